use std::sync::Arc;

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zkr_common::PrivateKey;
use zkr_merkle::LeafSelection;
use zkr_operator::adapters::{open_db, temporary_db, SledTreeStore};
use zkr_operator::ports::TreeStore;
use zkr_operator::{BalanceLeaf, BalanceTree, TreeState};

// === Test Fixtures ===

fn random_tree(seed: u64, depth: usize, leaves: usize) -> BalanceTree {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut tree = BalanceTree::new(depth, Fr::ZERO).unwrap();
    for _ in 0..leaves {
        let pk = PrivateKey::random_with(&mut rng).unwrap().public_key();
        let balance = rng.gen_range(0..1_000_000u128);
        let nonce = rng.gen_range(0..10u64);
        tree.insert_leaf(BalanceLeaf::new(pk, balance, nonce)).unwrap();
    }
    let touched = rng.gen_range(0..leaves as u64);
    let leaf = tree.leaf_raw(touched).cloned().unwrap();
    tree.update_leaf(touched, BalanceLeaf::new(leaf.public_key, leaf.balance + 1, leaf.nonce + 1))
        .unwrap();
    tree
}

fn fresh_store() -> SledTreeStore {
    SledTreeStore::new(&temporary_db().unwrap()).unwrap()
}

// === Round trip ===

#[test]
fn load_of_save_equals_the_original() {
    for seed in 0..4 {
        let tree = random_tree(seed, 4, 5 + seed as usize);
        let store = fresh_store();
        store.save("balance", &tree, &LeafSelection::All).unwrap();

        let loaded = store.load("balance").unwrap().unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(loaded.leaves_raw(), tree.leaves_raw());
        assert_eq!(loaded.root(), tree.root());
    }
}

#[test]
fn save_of_load_is_byte_identical() {
    let tree = random_tree(42, 4, 9);

    let first = fresh_store();
    first.save("balance", &tree, &LeafSelection::All).unwrap();
    let reloaded = first.load("balance").unwrap().unwrap();

    let second = fresh_store();
    second.save("balance", &reloaded, &LeafSelection::All).unwrap();

    assert_eq!(first.entries().unwrap(), second.entries().unwrap());
}

#[test]
fn updates_after_reload_keep_paths_consistent() {
    let store = fresh_store();
    let tree = random_tree(3, 3, 4);
    store.save("balance", &tree, &LeafSelection::All).unwrap();

    let mut loaded = store.load("balance").unwrap().unwrap();
    let mut expected = tree.clone();
    let leaf = loaded.leaf_raw(2).cloned().unwrap();
    let updated = BalanceLeaf::new(leaf.public_key, 0, leaf.nonce);
    loaded.update_leaf(2, updated.clone()).unwrap();
    expected.update_leaf(2, updated).unwrap();

    assert_eq!(loaded.root(), expected.root());
    for index in 0..loaded.next_leaf_index() {
        let path = loaded.update_path(index).unwrap();
        assert!(loaded.verify_path(loaded.leaf(index).unwrap(), &path));
    }
}

// === On-disk lifecycle ===

#[tokio::test]
async fn tree_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("operator-db");
    let pk = PrivateKey::from_scalar(Fr::from(8)).public_key();

    let root = {
        let db = open_db(&path).unwrap();
        let store = Arc::new(SledTreeStore::new(&db).unwrap());
        let state = TreeState::open("balance", 3, Fr::ZERO, store.clone()).unwrap();
        for balance in [10u128, 20, 30] {
            state
                .mutate(|tree| {
                    tree.insert_leaf(BalanceLeaf::new(pk, balance, 0))?;
                    Ok(((), LeafSelection::Latest))
                })
                .await
                .unwrap();
        }
        store.flush().unwrap();
        state.root().await
    };

    let db = open_db(&path).unwrap();
    let store = Arc::new(SledTreeStore::new(&db).unwrap());
    let state = TreeState::open("balance", 3, Fr::ZERO, store).unwrap();
    assert_eq!(state.root().await, root);
    assert_eq!(state.snapshot().await.next_leaf_index(), 3);
}
