//! Rollback guarantees, fast pivot import and the recovery walkers.

mod common;

use common::*;
use tandem_node::types::{FastImportResult, ImportResult};

#[test]
fn receipts_root_mismatch_rolls_back_state() {
    // P4: correct header, deliberately wrong declared receipts root; the
    // working state root must be byte-for-byte what it was before the call
    let params = test_params(1_000_000);
    let sender = funded_key();
    let mut chain = new_chain(&params, &[(addr_of_key(&sender), 1_000_000_000)]);

    let best = chain.best_block();
    let tx = transfer(&sender, 0, [0x77; 32], 1_000);
    let mut template = chain.build_mining_template(&best, vec![tx], false).unwrap();
    template.header.receipts_root = [0xBA; 32];
    let block = seal_mining(template);

    let root_before = chain.state_root();
    let td_before = chain.total_difficulty();

    assert_eq!(chain.import(&block).unwrap(), ImportResult::Invalid);

    assert_eq!(chain.state_root(), root_before);
    assert_eq!(chain.total_difficulty(), td_before);
    assert_eq!(chain.best_block().height(), 0);
    // sender untouched
    let reader_root = chain.state_root();
    assert!(chain.state_store().is_valid_root(&reader_root));
}

#[test]
fn state_root_lie_is_rejected_and_rolled_back() {
    let params = test_params(1_000_000);
    let sender = funded_key();
    let mut chain = new_chain(&params, &[(addr_of_key(&sender), 1_000_000_000)]);

    let best = chain.best_block();
    let tx = transfer(&sender, 0, [0x78; 32], 500);
    let mut template = chain.build_mining_template(&best, vec![tx], false).unwrap();
    template.header.state_root = [0xDE; 32];
    let block = seal_mining(template);

    let root_before = chain.state_root();
    assert_eq!(chain.import(&block).unwrap(), ImportResult::Invalid);
    assert_eq!(chain.state_root(), root_before);
}

#[test]
fn losing_fork_discards_its_state_mutations() {
    // the fork executes speculatively; its transfer must not leak into the
    // canonical state
    let params = test_params(1_000_000);
    let sender = funded_key();
    let mut chain = new_chain(&params, &[(addr_of_key(&sender), 1_000_000_000)]);

    let a1 = mine_on_best(&mut chain);
    chain.import(&a1).unwrap();
    let a2 = mine_on_best(&mut chain);
    chain.import(&a2).unwrap();

    // side block on a1 carrying a transfer
    let tx = transfer(&sender, 0, [0x79; 32], 12_345);
    let mut template = chain.build_mining_template(&a1, vec![tx], false).unwrap();
    template.header.extra_data = vec![0xF0];
    let side = seal_mining(template);

    let root_before = chain.state_root();
    assert_eq!(chain.import(&side).unwrap(), ImportResult::ImportedSide);
    assert_eq!(chain.state_root(), root_before);
}

#[test]
fn fast_import_requires_a_vouching_child() {
    let params = test_params(1_000_000);

    // a peer with history
    let mut peer = new_chain(&params, &[]);
    let blocks = grow(&mut peer, 3);

    // pivot sync: stage the tip, then fill ancestors backward
    let mut chain = new_chain(&params, &[]);
    let a1 = &blocks[0];
    let a2 = &blocks[1];
    let a3 = &blocks[2];

    // nothing vouches for a2 yet
    assert_eq!(chain.fast_import(a2).unwrap(), FastImportResult::NoChild);

    chain.index_store().save_pivot(a3).unwrap();
    assert_eq!(chain.fast_import(a2).unwrap(), FastImportResult::Imported);
    assert_eq!(chain.fast_import(a2).unwrap(), FastImportResult::AlreadyKnown);
    assert_eq!(chain.fast_import(a1).unwrap(), FastImportResult::Imported);

    // stored but not yet indexed: totals rebuild later
    assert!(chain.index_store().is_block_stored(&a1.hash(), 1));
    assert!(!chain.index_store().is_indexed(&a1.hash()));
}

#[test]
fn future_dated_fast_import_is_invalid() {
    let params = test_params(1_000_000);
    let mut chain = new_chain(&params, &[]);

    let mut peer = new_chain(&params, &[]);
    let mut block = mine_on_best(&mut peer);
    block.header.timestamp = tandem_node::now_ts() + params.clock_drift_secs + 999;
    let block = seal_mining(block);

    assert_eq!(chain.fast_import(&block).unwrap(), FastImportResult::Invalid);
}

#[test]
fn recover_state_rebuilds_a_forgotten_version() {
    let params = test_params(1_000_000);
    let sender = funded_key();
    let mut chain = new_chain(&params, &[(addr_of_key(&sender), 1_000_000_000)]);

    let best = chain.best_block();
    let tx = transfer(&sender, 0, [0x80; 32], 777);
    let b1 = {
        let t = chain.build_mining_template(&best, vec![tx], false).unwrap();
        seal_mining(t)
    };
    chain.import(&b1).unwrap();
    let b2 = mine_on_best(&mut chain);
    chain.import(&b2).unwrap();

    // simulate pruning/corruption of b1's state version
    chain.state_store().forget(&b1.header.state_root).unwrap();
    assert!(!chain.state_store().is_valid_root(&b1.header.state_root));

    assert!(chain.recover_state(&b1).unwrap());
    assert!(chain.state_store().is_valid_root(&b1.header.state_root));
    // working state is back on the best block
    assert_eq!(chain.state_root(), b2.header.state_root);
}

#[test]
fn recover_state_fails_without_history() {
    let params = test_params(1_000_000);
    let mut chain = new_chain(&params, &[]);

    // a foreign block whose ancestry we do not have
    let mut peer = new_chain(&params, &[]);
    grow(&mut peer, 2);
    let foreign = {
        let best = peer.best_block();
        mine_on(&mut peer, &best, vec![])
    };

    assert!(!chain.recover_state(&foreign).unwrap());
}

#[test]
fn reimport_repairs_corrupted_state() {
    // a duplicate submission opportunistically restores a pruned version
    let params = test_params(1_000_000);
    let mut chain = new_chain(&params, &[]);
    let blocks = grow(&mut chain, 2);
    let b1 = &blocks[0];

    chain.state_store().forget(&b1.header.state_root).unwrap();
    assert_eq!(chain.import(b1).unwrap(), ImportResult::AlreadyExists);
    assert!(chain.state_store().is_valid_root(&b1.header.state_root));
}

#[test]
fn recover_index_rebuilds_totals() {
    let params = test_params(1_000_000);
    let mut chain = new_chain(&params, &[]);
    let blocks = grow(&mut chain, 3);
    let b2 = &blocks[1];
    let b3 = &blocks[2];

    let before = chain.index_store().dual_difficulty_of(&b3.hash()).unwrap().unwrap();

    chain.index_store().forget_difficulty(&b2.hash()).unwrap();
    chain.index_store().forget_difficulty(&b3.hash()).unwrap();
    assert!(!chain.index_store().is_indexed(&b3.hash()));

    assert!(chain.recover_index(b3).unwrap());
    assert!(chain.index_store().is_indexed(&b2.hash()));
    let after = chain.index_store().dual_difficulty_of(&b3.hash()).unwrap().unwrap();
    assert_eq!(after, before);
}

#[test]
fn chain_reopens_from_disk() {
    let params = test_params(1_000_000);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chaindb");

    let (best_hash, td) = {
        let db = sled::open(&path).unwrap();
        let mut chain =
            tandem_node::Chain::with_db(db, params.clone(), collaborators(TEST_STAKE), &[]).unwrap();
        grow(&mut chain, 3);
        (chain.best_block().hash(), chain.total_difficulty())
    };

    let db = sled::open(&path).unwrap();
    let chain =
        tandem_node::Chain::with_db(db, params.clone(), collaborators(TEST_STAKE), &[]).unwrap();
    assert_eq!(chain.best_block().hash(), best_hash);
    assert_eq!(chain.total_difficulty(), td);
    assert_eq!(chain.best_block().height(), 3);
    drop(chain);

    // a different premine produces a different genesis: refuse the database
    let db = sled::open(&path).unwrap();
    assert!(
        tandem_node::Chain::with_db(db, params, collaborators(TEST_STAKE), &[([9u8; 32], 5)])
            .is_err()
    );
}

#[test]
fn pivot_chain_recovers_into_canonical() {
    // full pivot-sync flow: stage blocks without validation, then let the
    // index walker rebuild totals, replay state and re-root the chain
    let params = test_params(1_000_000);
    let mut peer = new_chain(&params, &[]);
    let blocks = grow(&mut peer, 3);

    let mut chain = new_chain(&params, &[]);
    chain.index_store().save_pivot(&blocks[2]).unwrap();
    assert_eq!(chain.fast_import(&blocks[1]).unwrap(), FastImportResult::Imported);
    assert_eq!(chain.fast_import(&blocks[0]).unwrap(), FastImportResult::Imported);

    assert!(chain.recover_index(&blocks[2]).unwrap());

    assert_eq!(chain.best_block().hash(), blocks[2].hash());
    assert_eq!(chain.total_difficulty(), peer.total_difficulty());
    assert!(chain.is_main_chain(&blocks[0].hash(), 1));
    assert!(chain.state_store().is_valid_root(&blocks[2].header.state_root));
}
