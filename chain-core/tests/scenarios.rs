//! End-to-end scenarios driving a `ChainProcessor` through real blocks,
//! rather than exercising one module's internals in isolation. Each test
//! corresponds to a walkthrough a reviewer would run by hand against a
//! running node.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kvstore::MemoryStore;
use shared::{Address, KeyPair, Network, Script, TokenData, Transaction, TxInput, TxOutput};

use chain_core::subchain::{RegistrationData, SubchainManager, SubchainPolicy, SyncFilter};
use chain_core::{
    BlockProducer, ChainProcessor, ConsensusParams, GenesisAllocation, Mempool, NullEventSink,
    ProtocolParams, Sealing,
};

const COIN: u64 = 1_000_000_000_000;

fn poa_params(genesis_address: Address, genesis_validator: [u8; 33]) -> ProtocolParams {
    ProtocolParams {
        network: Network::Testnet,
        consensus: ConsensusParams::ProofOfAuthority {
            slot_duration: 5,
            min_validator_stake: 0,
            genesis_validators: vec![genesis_validator],
        },
        block_reward: COIN / 1_000,
        max_supply: 0,
        coinbase_maturity: 0,
        min_fee_rate: 0,
        mempool_capacity: 10_000,
        max_block_transactions: 5_000,
        max_token_amount: (1u64 << 63) - 1,
        token_creation_fee: 50 * COIN,
        max_timestamp_skew: 120,
        genesis_timestamp: 1_700_000_000,
        genesis_allocations: vec![GenesisAllocation {
            address: genesis_address,
            amount: 100_000 * COIN,
        }],
    }
}

fn mine_poa_block(
    processor: &mut ChainProcessor<NullEventSink>,
    mempool: &Mempool,
    keypair: &KeyPair,
    reward_address: &Address,
) {
    let producer = BlockProducer::new(processor.params(), processor.consensus());
    let recent = processor.recent_headers(64).to_vec();
    let block = producer
        .produce_block(
            processor.tip(),
            &recent,
            processor.utxos(),
            mempool,
            processor.current_supply(),
            reward_address,
            Sealing::Authority(keypair),
        )
        .unwrap();
    processor.apply_block(block).unwrap();
}

/// S1: a single-validator PoA chain progresses through three empty blocks,
/// crediting the reward to the validator each time.
#[test]
fn s1_poa_single_validator_progresses_through_empty_blocks() {
    let validator = KeyPair::generate();
    let validator_address = Address::from_compressed_pubkey(validator.public_key().as_bytes());
    let params = poa_params(validator_address, *validator.public_key().as_bytes());

    let store = Arc::new(MemoryStore::new());
    let mut processor = ChainProcessor::open(store, params, NullEventSink).unwrap();
    let mempool = Mempool::new();

    assert_eq!(processor.height(), 0);
    assert_eq!(processor.current_supply(), 100_000 * COIN);

    for _ in 0..3 {
        mine_poa_block(&mut processor, &mempool, &validator, &validator_address);
    }

    assert_eq!(processor.height(), 3);
    assert_eq!(
        processor.current_supply(),
        100_000 * COIN + 3 * (COIN / 1_000)
    );
    assert_eq!(processor.utxos().len(), 4);

    let validator_set = match processor.consensus() {
        chain_core::ConsensusEngine::Poa(engine) => engine.validator_set(processor.utxos()),
        _ => panic!("expected a PoA engine"),
    };
    assert_eq!(validator_set.len(), 1);
    assert!(matches!(
        processor.consensus(),
        chain_core::ConsensusEngine::Poa(engine) if engine.is_genesis_validator(&validator.public_key())
    ));
}

/// S2: from the state S1 leaves behind, spending the genesis allocation pays
/// B directly and returns change to A, and the next block's coinbase
/// collects exactly that transaction's fee on top of the block reward.
#[test]
fn s2_spending_the_genesis_allocation_pays_a_fee_the_next_coinbase_collects() {
    let validator = KeyPair::generate();
    let validator_address = Address::from_compressed_pubkey(validator.public_key().as_bytes());
    let params = poa_params(validator_address, *validator.public_key().as_bytes());

    let store = Arc::new(MemoryStore::new());
    let mut processor = ChainProcessor::open(store, params, NullEventSink).unwrap();
    let mut mempool = Mempool::new();

    for _ in 0..3 {
        mine_poa_block(&mut processor, &mempool, &validator, &validator_address);
    }

    let genesis_txid = processor.get_block_by_height(0).unwrap().transactions[0].hash();
    let genesis_outpoint = shared::types::Outpoint::new(genesis_txid, 0);

    let recipient = KeyPair::generate();
    let recipient_address = Address::from_compressed_pubkey(recipient.public_key().as_bytes());

    let fee = COIN / 100;
    let pay_to_b = COIN;
    let change_to_a = 100_000 * COIN - pay_to_b - fee;

    let mut spend = Transaction::new(
        vec![TxInput::new(
            genesis_outpoint,
            vec![],
            validator.public_key().as_bytes().to_vec(),
        )],
        vec![
            TxOutput::new(pay_to_b, Script::p2pkh(&recipient_address), None),
            TxOutput::new(change_to_a, Script::p2pkh(&validator_address), None),
        ],
        0,
    );
    let sig = validator.sign(&spend.hash());
    spend.inputs[0].signature = sig.as_bytes().to_vec();

    mempool
        .admit(spend.clone(), processor.utxos(), processor.height(), processor.params())
        .unwrap();

    let supply_before = processor.current_supply();
    mine_poa_block(&mut processor, &mempool, &validator, &validator_address);

    assert_eq!(processor.height(), 4);
    let block = processor.get_block_by_height(4).unwrap();
    assert_eq!(block.transactions.len(), 2);
    let coinbase_value = block.transactions[0].total_output_value().unwrap();
    assert_eq!(coinbase_value, COIN / 1_000 + fee);
    assert_eq!(
        processor.current_supply(),
        supply_before + COIN / 1_000
    );

    assert_eq!(processor.balance_of(&recipient_address), pay_to_b);
    assert!(processor.balance_of(&validator_address) >= change_to_a);
}

/// S3: a capped-supply chain pays the full reward while headroom remains,
/// clamps it down to the remaining headroom, pays zero once the cap is
/// reached, and still collects fees on top of a zero reward.
#[test]
fn s3_reward_saturates_at_the_supply_cap_but_fees_still_flow() {
    let keypair = KeyPair::generate();
    let address = Address::from_compressed_pubkey(keypair.public_key().as_bytes());
    let mut params = ProtocolParams::default();
    params.block_reward = 50;
    params.max_supply = 100;
    params.min_fee_rate = 0;
    params.coinbase_maturity = 0;
    params.genesis_allocations = vec![GenesisAllocation { address, amount: 80 }];

    let store = Arc::new(MemoryStore::new());
    let mut processor = ChainProcessor::open(store, params, NullEventSink).unwrap();
    assert_eq!(processor.current_supply(), 80);

    let cancel = AtomicBool::new(false);
    let mine = |processor: &mut ChainProcessor<NullEventSink>, mempool: &Mempool| {
        let producer = BlockProducer::new(processor.params(), processor.consensus());
        let recent = processor.recent_headers(64).to_vec();
        let block = producer
            .produce_block(
                processor.tip(),
                &recent,
                processor.utxos(),
                mempool,
                processor.current_supply(),
                &address,
                Sealing::Work(&cancel),
            )
            .unwrap();
        processor.apply_block(block).unwrap();
    };

    let empty = Mempool::new();
    mine(&mut processor, &empty);
    let block1 = processor.get_block_by_height(1).unwrap();
    assert_eq!(block1.transactions[0].total_output_value().unwrap(), 20);
    assert_eq!(processor.current_supply(), 100);

    mine(&mut processor, &empty);
    let block2 = processor.get_block_by_height(2).unwrap();
    assert_eq!(block2.transactions[0].total_output_value().unwrap(), 0);
    assert_eq!(processor.current_supply(), 100);

    // A block containing a 7-unit-fee transaction still collects that fee
    // on top of the now-zero block reward.
    let genesis_txid = processor.get_block_by_height(0).unwrap().transactions[0].hash();
    let mut fee_tx = Transaction::new(
        vec![TxInput::new(
            shared::types::Outpoint::new(genesis_txid, 0),
            vec![],
            keypair.public_key().as_bytes().to_vec(),
        )],
        vec![TxOutput::new(73, Script::p2pkh(&address), None)],
        0,
    );
    let sig = keypair.sign(&fee_tx.hash());
    fee_tx.inputs[0].signature = sig.as_bytes().to_vec();

    let mut mempool = Mempool::new();
    mempool
        .admit(fee_tx, processor.utxos(), processor.height(), processor.params())
        .unwrap();
    mine(&mut processor, &mempool);

    let block3 = processor.get_block_by_height(3).unwrap();
    assert_eq!(block3.transactions[0].total_output_value().unwrap(), 7);
}

/// S4: minting a token pays the creation fee and conserves the minted
/// amount across a later split; a split that doesn't conserve it is
/// rejected outright.
#[test]
fn s4_mint_then_conserve_then_reject_a_bad_split() {
    let keypair = KeyPair::generate();
    let address = Address::from_compressed_pubkey(keypair.public_key().as_bytes());

    let mut params = ProtocolParams::default();
    params.min_fee_rate = 0;
    params.coinbase_maturity = 0;
    params.genesis_allocations = vec![GenesisAllocation {
        address,
        amount: 1_000_000 * COIN,
    }];

    let store = Arc::new(MemoryStore::new());
    let mut processor = ChainProcessor::open(store, params, NullEventSink).unwrap();
    let cancel = AtomicBool::new(false);

    let mut mine = |processor: &mut ChainProcessor<NullEventSink>, mempool: &Mempool| {
        let producer = BlockProducer::new(processor.params(), processor.consensus());
        let recent = processor.recent_headers(64).to_vec();
        let block = producer
            .produce_block(
                processor.tip(),
                &recent,
                processor.utxos(),
                mempool,
                processor.current_supply(),
                &address,
                Sealing::Work(&cancel),
            )
            .unwrap();
        processor.apply_block(block).unwrap();
    };

    let genesis_txid = processor.get_block_by_height(0).unwrap().transactions[0].hash();
    let genesis_outpoint = shared::types::Outpoint::new(genesis_txid, 0);

    let unsigned = Transaction::new(
        vec![TxInput::new(genesis_outpoint, vec![], vec![])],
        vec![],
        0,
    );
    let token_id = unsigned.mint_token_id().unwrap();

    let fee = 50 * COIN;
    let mut mint_tx = Transaction::new(
        vec![TxInput::new(
            genesis_outpoint,
            vec![],
            keypair.public_key().as_bytes().to_vec(),
        )],
        vec![TxOutput::new(
            1_000_000 * COIN - fee,
            Script::mint(&address, None),
            Some(TokenData {
                id: token_id,
                amount: 1_000_000,
            }),
        )],
        0,
    );
    let sig = keypair.sign(&mint_tx.hash());
    mint_tx.inputs[0].signature = sig.as_bytes().to_vec();

    let mut mempool = Mempool::new();
    mempool
        .admit(mint_tx, processor.utxos(), processor.height(), processor.params())
        .unwrap();
    mine(&mut processor, &mempool);

    let mint_block = processor.get_block_by_height(1).unwrap();
    mempool.invalidate_confirmed(&mint_block.transactions);
    let mint_txid = mint_block.transactions[1].hash();
    let mint_outpoint = shared::types::Outpoint::new(mint_txid, 0);
    let mint_value = mint_block.transactions[1].outputs[0].value;

    // A conservation-violating split (400,000 + 600,001 != 1,000,000) is
    // rejected by the mempool before it ever reaches a block.
    let mut bad_split = Transaction::new(
        vec![TxInput::new(
            mint_outpoint,
            vec![],
            keypair.public_key().as_bytes().to_vec(),
        )],
        vec![
            TxOutput::new(
                mint_value / 2,
                Script::p2pkh(&address),
                Some(TokenData {
                    id: token_id,
                    amount: 400_000,
                }),
            ),
            TxOutput::new(
                mint_value / 2,
                Script::p2pkh(&address),
                Some(TokenData {
                    id: token_id,
                    amount: 600_001,
                }),
            ),
        ],
        0,
    );
    let sig = keypair.sign(&bad_split.hash());
    bad_split.inputs[0].signature = sig.as_bytes().to_vec();
    assert!(mempool
        .admit(bad_split, processor.utxos(), processor.height(), processor.params())
        .is_err());

    // The corrected split (400,000 + 600,000 == 1,000,000) is accepted.
    let mut good_split = Transaction::new(
        vec![TxInput::new(
            mint_outpoint,
            vec![],
            keypair.public_key().as_bytes().to_vec(),
        )],
        vec![
            TxOutput::new(
                mint_value / 2,
                Script::p2pkh(&address),
                Some(TokenData {
                    id: token_id,
                    amount: 400_000,
                }),
            ),
            TxOutput::new(
                mint_value / 2,
                Script::p2pkh(&address),
                Some(TokenData {
                    id: token_id,
                    amount: 600_000,
                }),
            ),
        ],
        0,
    );
    let sig = keypair.sign(&good_split.hash());
    good_split.inputs[0].signature = sig.as_bytes().to_vec();
    mempool
        .admit(good_split, processor.utxos(), processor.height(), processor.params())
        .unwrap();
    mine(&mut processor, &mempool);

    assert_eq!(processor.height(), 2);
}

fn poa_registration_payload(validator: &KeyPair) -> Vec<u8> {
    serde_json::to_vec(&RegistrationData {
        name: "Side Chain".to_string(),
        symbol: "SIDE".to_string(),
        consensus_type: "poa".to_string(),
        block_time: 5,
        block_reward: 1_000,
        max_supply: 1_000_000,
        min_fee_rate: 1,
        validators: vec![hex::encode(validator.public_key().as_bytes())],
        initial_difficulty: 0,
        difficulty_adjust: 0,
        validator_stake: 0,
    })
    .unwrap()
}

/// S5: a confirmed Register output of at least the minimum deposit spawns
/// an isolated sub-chain whose state never touches the root chain's UTXO
/// set.
#[test]
fn s5_registration_spawns_an_isolated_subchain() {
    let root_keypair = KeyPair::generate();
    let root_address = Address::from_compressed_pubkey(root_keypair.public_key().as_bytes());
    let validator = KeyPair::generate();

    let mut root_params = ProtocolParams::default();
    root_params.min_fee_rate = 0;
    root_params.coinbase_maturity = 0;
    root_params.genesis_allocations = vec![GenesisAllocation {
        address: root_address,
        amount: 1_000 * COIN,
    }];

    let root_store = Arc::new(MemoryStore::new());
    let sink = SubchainManager::new(root_store.clone(), SubchainPolicy::default(), SyncFilter::All);
    let mut processor = ChainProcessor::open(root_store, root_params, sink).unwrap();
    let cancel = AtomicBool::new(false);

    let genesis_txid = processor.get_block_by_height(0).unwrap().transactions[0].hash();
    let genesis_outpoint = shared::types::Outpoint::new(genesis_txid, 0);

    let deposit = COIN;
    let mut register_tx = Transaction::new(
        vec![TxInput::new(
            genesis_outpoint,
            vec![],
            root_keypair.public_key().as_bytes().to_vec(),
        )],
        vec![
            TxOutput::new(deposit, Script::register(poa_registration_payload(&validator)), None),
            TxOutput::new(
                1_000 * COIN - deposit,
                Script::p2pkh(&root_address),
                None,
            ),
        ],
        0,
    );
    let sig = root_keypair.sign(&register_tx.hash());
    register_tx.inputs[0].signature = sig.as_bytes().to_vec();
    let register_txid = register_tx.hash();

    let mut mempool = Mempool::new();
    mempool
        .admit(register_tx, processor.utxos(), processor.height(), processor.params())
        .unwrap();

    let producer = BlockProducer::new(processor.params(), processor.consensus());
    let recent = processor.recent_headers(64).to_vec();
    let block = producer
        .produce_block(
            processor.tip(),
            &recent,
            processor.utxos(),
            &mempool,
            processor.current_supply(),
            &root_address,
            Sealing::Work(&cancel),
        )
        .unwrap();
    processor.apply_block(block).unwrap();

    let chain_id = chain_core::derive_chain_id(register_txid, 0);
    assert_eq!(processor.sink().list_chains(), vec![chain_id]);

    let root_utxo_count_before = processor.utxos().len();
    let spawned = processor.sink().get_chain(&chain_id).expect("sub-chain spawned");
    assert_eq!(spawned.processor.height(), 0);
    assert_ne!(spawned.processor.tip().hash(), processor.tip().hash());
    assert_eq!(processor.utxos().len(), root_utxo_count_before);
}

/// S6: reorging away the block that confirmed a registration deregisters
/// the sub-chain and wipes its namespace.
#[test]
fn s6_reorg_away_the_registration_deregisters_the_subchain() {
    let root_keypair = KeyPair::generate();
    let root_address = Address::from_compressed_pubkey(root_keypair.public_key().as_bytes());
    let validator = KeyPair::generate();

    let mut root_params = ProtocolParams::default();
    root_params.min_fee_rate = 0;
    root_params.coinbase_maturity = 0;
    root_params.genesis_allocations = vec![GenesisAllocation {
        address: root_address,
        amount: 1_000 * COIN,
    }];

    let root_store = Arc::new(MemoryStore::new());
    let sink = SubchainManager::new(root_store.clone(), SubchainPolicy::default(), SyncFilter::All);
    let mut processor = ChainProcessor::open(root_store, root_params, sink).unwrap();
    let cancel = AtomicBool::new(false);

    let genesis_txid = processor.get_block_by_height(0).unwrap().transactions[0].hash();
    let genesis_outpoint = shared::types::Outpoint::new(genesis_txid, 0);
    let deposit = COIN;

    let mut register_tx = Transaction::new(
        vec![TxInput::new(
            genesis_outpoint,
            vec![],
            root_keypair.public_key().as_bytes().to_vec(),
        )],
        vec![
            TxOutput::new(deposit, Script::register(poa_registration_payload(&validator)), None),
            TxOutput::new(1_000 * COIN - deposit, Script::p2pkh(&root_address), None),
        ],
        0,
    );
    let sig = root_keypair.sign(&register_tx.hash());
    register_tx.inputs[0].signature = sig.as_bytes().to_vec();
    let register_txid = register_tx.hash();

    let mut mempool = Mempool::new();
    mempool
        .admit(register_tx, processor.utxos(), processor.height(), processor.params())
        .unwrap();

    let producer = BlockProducer::new(processor.params(), processor.consensus());
    let recent = processor.recent_headers(64).to_vec();
    let registration_block = producer
        .produce_block(
            processor.tip(),
            &recent,
            processor.utxos(),
            &mempool,
            processor.current_supply(),
            &root_address,
            Sealing::Work(&cancel),
        )
        .unwrap();
    processor.apply_block(registration_block).unwrap();

    let chain_id = chain_core::derive_chain_id(register_txid, 0);
    assert!(processor.sink().get_chain(&chain_id).is_some());

    // Revert back to genesis and replay a different, empty block on top of
    // it: a reorg that discards the registration entirely.
    let genesis_header = processor.get_block_by_height(0).unwrap().header;
    let producer = BlockProducer::new(processor.params(), processor.consensus());
    let replacement_block = producer
        .produce_block(
            &genesis_header,
            &[genesis_header.clone()],
            &chain_core::UtxoSet::new(),
            &Mempool::new(),
            processor.params().genesis_allocations.iter().map(|a| a.amount).sum(),
            &root_address,
            Sealing::Work(&cancel),
        )
        .unwrap();

    processor.reorg_to(vec![replacement_block]).unwrap();

    assert!(processor.sink().get_chain(&chain_id).is_none());
    assert!(processor.sink().metadata(&chain_id).is_none());
    assert!(processor.sink().list_chains().is_empty());
}
