use polyseq_core::{KeyTable, calculate_psn, decrypt, derive_key_table, encrypt};
use rand::Rng;
use rand::distributions::{Alphanumeric, DistString};

#[test]
fn random_printable_messages_round_trip() {
    let mut rng = rand::thread_rng();
    for _ in 0..256 {
        let p: u64 = rng.r#gen();
        let q: u64 = rng.r#gen();
        let s: u64 = rng.r#gen();
        let num_keys = rng.gen_range(1..=64);
        let (table, _) = derive_key_table(p, q, s, num_keys).expect("derive table");
        let (twin, _) = derive_key_table(p, q, s, num_keys).expect("derive table");
        assert_eq!(table, twin);

        let len = rng.gen_range(1..=96);
        let message: Vec<u8> = (0..len).map(|_| rng.gen_range(0x20u8..=0x7E)).collect();
        let psn = calculate_psn(&message, None).unwrap();
        assert!(psn <= 15);
        let payload = encrypt(&message, &table, psn);
        assert_eq!(payload.len(), message.len());
        assert_eq!(decrypt(&payload, &table), message);
    }
}

#[test]
fn arbitrary_bytes_and_wide_psn_round_trip() {
    let mut rng = rand::thread_rng();
    for _ in 0..128 {
        let keys: Vec<u64> = (0..rng.gen_range(1..=16)).map(|_| rng.r#gen()).collect();
        let table = KeyTable::from_keys(keys).unwrap();
        let message: Vec<u8> = (0..rng.gen_range(0..=128)).map(|_| rng.r#gen()).collect();
        let psn: u64 = rng.r#gen();
        let payload = encrypt(&message, &table, psn);
        assert_eq!(decrypt(&payload, &table), message);
    }
}

#[test]
fn chained_psn_stays_in_nibble() {
    let mut rng = rand::thread_rng();
    let mut previous = None;
    for _ in 0..512 {
        let len = rng.gen_range(1..=40);
        let message = Alphanumeric.sample_string(&mut rng, len);
        let psn = calculate_psn(message.as_bytes(), previous).unwrap();
        assert!(psn <= 15);
        previous = Some(psn);
    }
}
