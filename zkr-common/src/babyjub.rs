//! Baby Jubjub, the twisted Edwards curve embedded in the BN254 scalar field.
//!
//! `a·x² + y² = 1 + d·x²·y²` with `a = 168700`, `d = 168696`. The curve has
//! cofactor 8; `BASE8` generates the prime-order subgroup of order
//! [`SUBGROUP_ORDER`]. Arithmetic runs in projective coordinates with the
//! complete addition law and converts back to affine once per operation.

use std::ops::Add;

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::field::{fr_from_decimal, fr_to_decimal};
use crate::CryptoError;

const BASE8_X: &str =
    "5299619240641551281634865583518297030282874472190772894086521144482721001553";
const BASE8_Y: &str =
    "16950150798460657717958625567821834550301663161624707787222815936182638968203";
const SUBGROUP_ORDER_DECIMAL: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

static A: Lazy<Fr> = Lazy::new(|| Fr::from(168_700));
static D: Lazy<Fr> = Lazy::new(|| Fr::from(168_696));

pub static BASE8: Lazy<Point> = Lazy::new(|| Point {
    x: fr_from_decimal(BASE8_X).expect("valid base point x"),
    y: fr_from_decimal(BASE8_Y).expect("valid base point y"),
});

/// Order `l` of the subgroup generated by [`BASE8`].
pub static SUBGROUP_ORDER: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(SUBGROUP_ORDER_DECIMAL.as_bytes(), 10).expect("valid subgroup order")
});

/// Affine point. Serialized as `["x", "y"]` decimal strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "[String; 2]", try_from = "[String; 2]")]
pub struct Point {
    pub x: Fr,
    pub y: Fr,
}

impl Point {
    pub fn new(x: Fr, y: Fr) -> Self {
        Self { x, y }
    }

    /// Checked constructor for coordinates arriving from outside the process.
    pub fn try_new(x: Fr, y: Fr) -> Result<Self, CryptoError> {
        let point = Self { x, y };
        if point.is_on_curve() {
            Ok(point)
        } else {
            Err(CryptoError::NotOnCurve)
        }
    }

    /// Neutral element `(0, 1)`.
    pub fn identity() -> Self {
        Self {
            x: Fr::ZERO,
            y: Fr::ONE,
        }
    }

    pub fn base8() -> Self {
        *BASE8
    }

    pub fn is_on_curve(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        *A * x2 + y2 == Fr::ONE + *D * x2 * y2
    }

    /// On the curve and annihilated by the subgroup order.
    pub fn in_subgroup(&self) -> bool {
        self.is_on_curve() && self.mul_scalar(&SUBGROUP_ORDER) == Self::identity()
    }

    /// Double-and-add over the bits of `scalar`, most significant first.
    pub fn mul_scalar(&self, scalar: &BigUint) -> Point {
        let base = Projective::from(*self);
        let mut acc = Projective::identity();
        for bit in (0..scalar.bits()).rev() {
            acc = acc.add(&acc);
            if scalar.bit(bit) {
                acc = acc.add(&base);
            }
        }
        acc.to_affine()
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, other: Point) -> Point {
        Projective::from(self)
            .add(&Projective::from(other))
            .to_affine()
    }
}

impl From<Point> for [String; 2] {
    fn from(point: Point) -> Self {
        [fr_to_decimal(&point.x), fr_to_decimal(&point.y)]
    }
}

impl TryFrom<[String; 2]> for Point {
    type Error = CryptoError;

    fn try_from(coords: [String; 2]) -> Result<Self, Self::Error> {
        Point::try_new(fr_from_decimal(&coords[0])?, fr_from_decimal(&coords[1])?)
    }
}

#[derive(Clone, Copy, Debug)]
struct Projective {
    x: Fr,
    y: Fr,
    z: Fr,
}

impl Projective {
    fn identity() -> Self {
        Self {
            x: Fr::ZERO,
            y: Fr::ONE,
            z: Fr::ONE,
        }
    }

    fn add(&self, other: &Projective) -> Projective {
        let a = self.z * other.z;
        let b = a.square();
        let c = self.x * other.x;
        let d = self.y * other.y;
        let e = *D * c * d;
        let f = b - e;
        let g = b + e;
        let x = a * f * ((self.x + self.y) * (other.x + other.y) - c - d);
        let y = a * g * (d - *A * c);
        let z = f * g;
        Projective { x, y, z }
    }

    fn to_affine(self) -> Point {
        match Option::<Fr>::from(self.z.invert()) {
            Some(z_inv) => Point {
                x: self.x * z_inv,
                y: self.y * z_inv,
            },
            // Only reachable from off-curve inputs; (0, 0) is itself off-curve.
            None => Point {
                x: Fr::ZERO,
                y: Fr::ZERO,
            },
        }
    }
}

impl From<Point> for Projective {
    fn from(point: Point) -> Self {
        Projective {
            x: point.x,
            y: point.y,
            z: Fr::ONE,
        }
    }
}
