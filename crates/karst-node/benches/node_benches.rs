//! Criterion benchmarks for karst-node storage operations.
//!
//! Covers: block append and unspent-output lookup via RocksDB-backed
//! storage.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use karst_core::address::p2pkh_from_pubkey_hex;
use karst_core::block::Block;
use karst_core::block_store::BlockStore;
use karst_core::crypto::KeyPair;
use karst_core::hash_engine::{self, HeaderFields};
use karst_core::target::max_target;
use karst_core::transaction::{Transaction, TxOutput};
use karst_core::utxo_index::UtxoIndex;
use rust_decimal_macros::dec;
use std::sync::Arc;

use karst_node_lib::storage::RocksStore;

fn coinbase(to: &str, value: rust_decimal::Decimal) -> Transaction {
    let mut tx = Transaction {
        public_key: "producer".into(),
        fee: Default::default(),
        hash: String::new(),
        relationship: None,
        dh_public_key: None,
        rid: None,
        inputs: vec![],
        outputs: vec![TxOutput { to: to.to_string(), value }],
        id: String::new(),
        coinbase: true,
    };
    tx.hash = tx.canonical_hash();
    tx
}

fn build_block(kp: &KeyPair, index: u64, prev_hash: &str, address: &str) -> Block {
    let tx = coinbase(address, dec!(50));
    let target = max_target();
    let merkle_root = hash_engine::merkle_root(&[tx.hash.clone()]);
    let fields = HeaderFields {
        version: 1,
        time: "100",
        public_key_hex: &kp.public_key_hex(),
        index,
        prev_hash,
        special_min: false,
        target: &target,
        merkle_root: &merkle_root,
    };
    let header = hash_engine::build_header_template(&fields);
    let mut block = Block {
        version: 1,
        time: "100".into(),
        index,
        public_key: kp.public_key_hex(),
        prev_hash: prev_hash.to_string(),
        nonce: "0".into(),
        transactions: vec![tx],
        hash: String::new(),
        merkle_root,
        special_min: false,
        target,
        header,
        signature: String::new(),
    };
    block.hash = block.recompute_hash();
    block.sign(kp).unwrap();
    block
}

fn bench_append(c: &mut Criterion) {
    c.bench_function("rocksstore_append", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let store = RocksStore::open(dir.path()).unwrap();
                let kp = KeyPair::generate();
                let address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();
                let block = build_block(&kp, 0, "", &address);
                (dir, store, block)
            },
            |(_dir, store, block)| {
                store.append(black_box(block)).unwrap();
            },
        )
    });
}

fn bench_unspent_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let kp = KeyPair::generate();
    let address = p2pkh_from_pubkey_hex(&kp.public_key_hex()).unwrap();

    let mut prev_hash = String::new();
    for h in 0..10 {
        let block = build_block(&kp, h, &prev_hash, &address);
        prev_hash = block.hash.clone();
        store.append(block).unwrap();
    }

    let utxo = UtxoIndex::new(Arc::clone(&store) as Arc<dyn BlockStore>);

    c.bench_function("utxo_unspent_outputs", |b| {
        b.iter(|| utxo.unspent_outputs(black_box(&address)))
    });
}

criterion_group!(benches, bench_append, bench_unspent_lookup);
criterion_main!(benches);
