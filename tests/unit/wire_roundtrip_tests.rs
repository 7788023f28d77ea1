//! Canonical-bytes round-trip laws, including randomized coverage.

use proptest::prelude::*;
use speedex_engine::crypto::KeyPair;
use speedex_engine::prelude::*;
use speedex_engine::wire::{
    CancelSellOfferOp, CreateAccountOp, CreateSellOfferOp, MoneyPrinterOp, Xdr,
};

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (any::<u64>(), any::<[u8; 32]>(), 10i64..1_000_000).prop_map(|(id, pk, bal)| {
            Operation::CreateAccount(CreateAccountOp {
                new_account_id: id,
                new_public_key: pk,
                starting_balance: bal,
            })
        }),
        (0u16..4, 1u16..4, 1i64..1_000_000, 1u64..(1 << 40)).prop_map(
            |(sell, buy, amount, price)| {
                Operation::CreateSellOffer(CreateSellOfferOp {
                    category: OfferCategory::new(sell, buy),
                    amount,
                    min_price: Price::from_raw(price),
                })
            }
        ),
        (0u16..4, 1u16..4, 1u64..(1 << 40), any::<u64>()).prop_map(
            |(sell, buy, price, offer_id)| {
                Operation::CancelSellOffer(CancelSellOfferOp {
                    category: OfferCategory::new(sell, buy),
                    min_price: Price::from_raw(price),
                    offer_id,
                })
            }
        ),
        (any::<u64>(), 0u16..4, 1i64..1_000_000).prop_map(|(receiver, asset, amount)| {
            Operation::Payment(PaymentOp {
                receiver,
                asset,
                amount,
            })
        }),
        (0u16..4, 0i64..1_000_000).prop_map(|(asset, amount)| {
            Operation::MoneyPrinter(MoneyPrinterOp { asset, amount })
        }),
    ]
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        any::<u64>(),
        0u64..(1 << 40),
        any::<u64>(),
        prop::collection::vec(arb_operation(), 1..16),
    )
        .prop_map(|(source, seq_base, max_fee, operations)| Transaction {
            metadata: TxMetadata {
                source_account: source,
                sequence_number: seq_base << 8,
                max_fee,
            },
            operations,
        })
}

proptest! {
    #[test]
    fn prop_transaction_roundtrip(tx in arb_transaction()) {
        let bytes = tx.to_xdr_bytes();
        let decoded = Transaction::from_xdr_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, tx);
    }

    #[test]
    fn prop_signed_transaction_roundtrip(tx in arb_transaction(), seed in any::<[u8; 32]>()) {
        let signed = KeyPair::from_seed(seed).sign_tx(tx);
        let bytes = signed.to_xdr_bytes();
        let decoded = SignedTransaction::from_xdr_bytes(&bytes).unwrap();
        prop_assert_eq!(&decoded, &signed);
        // canonical bytes are stable, so the signature still verifies
        prop_assert!(speedex_engine::crypto::check_tx_signature(
            &decoded,
            &KeyPair::from_seed(seed).public_key()
        ));
    }

    #[test]
    fn prop_truncated_input_never_panics(tx in arb_transaction(), cut in 0usize..64) {
        let bytes = tx.to_xdr_bytes();
        let cut = cut.min(bytes.len());
        let _ = Transaction::from_xdr_bytes(&bytes[..bytes.len() - cut]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::*;

    #[test]
    fn test_block_roundtrips_through_wire() {
        let (engine, _kv) = engine_with_accounts(2, 4, 1_000_000);
        engine.add_txs(vec![
            payment(0, 256, 1, 0, 500, 15),
            sell_offer(2, 256, 0, 1, 100, Price::ONE),
        ]);
        let block = engine.propose();

        let bytes = block.to_xdr_bytes();
        let decoded = Block::from_xdr_bytes(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hashed.header.hash(), block.hashed.header_hash);

        // and the decoded copy validates on a fresh engine
        let (validator, _kv2) = engine_with_accounts(2, 4, 1_000_000);
        assert!(validator.exec_block(&decoded));
    }
}
