use ima_bls::digest::{digest_messages, digest_u256, digest_verbatim};
use ima_bls::types::Message;
use proptest::prelude::*;

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        proptest::collection::vec(any::<u8>(), 1..=20),
        proptest::collection::vec(any::<u8>(), 1..=20),
        proptest::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(sender, dest, data)| Message {
            sender: format!("0x{}", hex::encode(sender)),
            destination_contract: format!("0x{}", hex::encode(dest)),
            data: format!("0x{}", hex::encode(data)),
        })
}

proptest! {
    #[test]
    fn digest_is_deterministic(
        messages in proptest::collection::vec(message_strategy(), 0..6),
        nonce in any::<u64>(),
        chain in "[A-Za-z0-9-]{1,16}",
    ) {
        let first = digest_messages(&messages, nonce, &chain).unwrap();
        let again = digest_messages(&messages.clone(), nonce, &chain).unwrap();
        prop_assert_eq!(first, again);
    }

    #[test]
    fn any_data_byte_changes_digest(
        messages in proptest::collection::vec(message_strategy(), 1..6),
        pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let before = digest_messages(&messages, 10, "S1").unwrap();

        let mut changed = messages.clone();
        let target = pick.index(changed.len());
        let mut data = hex::decode(&changed[target].data[2..]).unwrap();
        if data.is_empty() {
            data.push(flip);
        } else {
            data[0] ^= flip;
        }
        changed[target].data = format!("0x{}", hex::encode(data));

        prop_assert_ne!(before, digest_messages(&changed, 10, "S1").unwrap());
    }

    #[test]
    fn order_and_nonce_matter(
        a in message_strategy(),
        b in message_strategy(),
        nonce in 0u64..u64::MAX,
    ) {
        prop_assume!(a.data != b.data);
        let forward = digest_messages(&[a.clone(), b.clone()], nonce, "S1").unwrap();
        let backward = digest_messages(&[b.clone(), a.clone()], nonce, "S1").unwrap();
        let shifted = digest_messages(&[a, b], nonce + 1, "S1").unwrap();
        prop_assert_ne!(forward, backward);
        prop_assert_ne!(forward, shifted);
    }

    #[test]
    fn verbatim_round_trips_hex(bytes in any::<[u8; 32]>()) {
        let upper = format!("0X{}", hex::encode_upper(bytes));
        let digest = digest_verbatim(&upper).unwrap();
        prop_assert_eq!(digest.as_bytes(), &bytes);
    }
}

#[test]
fn u256_prefix_and_case_do_not_matter() {
    assert_eq!(
        digest_u256("0xABCDEF").unwrap(),
        digest_u256(" abcdef ").unwrap()
    );
}
