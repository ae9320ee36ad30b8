//! Integration test: one user discloses, another learns they were exposed.
//!
//! 1. Alice broadcasts a day of numbers from a fresh RAK.
//! 2. Bob overhears a few of them (plus unrelated traffic) into SQLite.
//! 3. Alice signs a report over her disclosure window and ships wire bytes.
//! 4. Bob decodes, verifies and matches the report.
//! 5. Bob's exposure status asks for a notification.

use std::sync::Arc;

use cwatch_crypto::ed25519;
use cwatch_db::queries::signed_reports;
use cwatch_db::SqliteStore;
use cwatch_exposure::notifier::exposure_status;
use cwatch_exposure::processor::{ProcessOutcome, ReportProcessor};
use cwatch_tcn::generator::TcnGenerator;
use cwatch_tcn::ratchet::ReportAuthorizationKey;
use cwatch_tcn::report::create_signed_report;
use cwatch_tcn::window::DisclosureWindow;
use cwatch_tcn::wire::{decode_signed_report, encode_signed_report};
use cwatch_types::cancel::CancelFlag;
use cwatch_types::report::MemoType;
use cwatch_types::store::ContactStore;
use cwatch_types::Tcn;
use rand::RngCore;
use tokio::sync::Mutex;

/// 15-minute periods in one day.
const PERIODS_PER_DAY: usize = 96;

const MINUTE: u64 = 60 * 1_000;

fn broadcast_day(generator: &TcnGenerator) -> Vec<Tcn> {
    (0..PERIODS_PER_DAY)
        .map(|_| generator.next_tcn().expect("next tcn"))
        .collect()
}

#[tokio::test]
async fn disclosed_numbers_flag_overheard_observations() {
    // Alice
    let rak = ReportAuthorizationKey::generate();
    let generator = TcnGenerator::new(&rak, None);
    let alice_numbers = broadcast_day(&generator);

    // Bob
    let mut bob = SqliteStore::open_memory().expect("bob store");
    for (period, tcn) in alice_numbers.iter().enumerate().filter(|(i, _)| i % 30 == 7) {
        bob.upsert_observation(tcn, period as u64 * 15 * MINUTE, 1.5)
            .expect("overheard");
    }
    let mut rng = rand::thread_rng();
    for i in 0..50u64 {
        let mut stranger = [0u8; 16];
        rng.fill_bytes(&mut stranger);
        bob.upsert_observation(&stranger, i * MINUTE, 4.0).expect("stranger");
    }

    // Alice tests positive
    let end = generator.current_index().expect("index").saturating_sub(1);
    let (start, end) = DisclosureWindow::default().bounds(end);
    assert_eq!((start, end), (0, PERIODS_PER_DAY as u16 - 1));
    let signed = create_signed_report(&rak, MemoType::CovidWatchV1, b"symptom onset 2d", start, end)
        .expect("sign report");

    // The report is signed by the RAK's own key
    let signer = ed25519::SigningKey::from_bytes(&rak.to_bytes());
    assert_eq!(
        signed.report.report_verification_public_key_bytes,
        signer.verifying_key().to_bytes()
    );

    let wire = encode_signed_report(&signed).expect("encode");

    // Bob receives the bytes
    let received = decode_signed_report(&wire).expect("decode");
    assert_eq!(received, signed);

    let store = Arc::new(Mutex::new(bob));
    let processor = ReportProcessor::with_chunk_size(store.clone(), 17);
    let outcome = processor
        .process(received.clone(), &CancelFlag::new())
        .await
        .expect("process");
    assert_eq!(
        outcome,
        ProcessOutcome::Matched {
            identifiers: PERIODS_PER_DAY,
            newly_flagged: 3,
        }
    );

    let bob = store.lock().await;
    let status = exposure_status(&*bob, false).expect("status");
    assert!(status.should_notify);
    // periods 7, 37 and 67 were overheard
    assert_eq!(status.most_recent_exposure, Some(67 * 15 * MINUTE));

    let stored = signed_reports::get(bob.conn(), &received.signature_bytes).expect("stored");
    assert!(!stored.is_local);
    assert!(stored.is_processed);
}

#[tokio::test]
async fn report_with_other_users_numbers_matches_nothing() {
    let alice = ReportAuthorizationKey::generate();
    let carol = ReportAuthorizationKey::generate();
    let carol_numbers = broadcast_day(&TcnGenerator::new(&carol, None));

    let mut bob = SqliteStore::open_memory().expect("bob store");
    for tcn in &carol_numbers {
        bob.upsert_observation(tcn, 1_000, 2.0).expect("overheard");
    }

    let signed = create_signed_report(&alice, MemoType::CovidWatchV1, b"", 0, 95).expect("sign");
    let processor = ReportProcessor::new(Arc::new(Mutex::new(bob)));
    let outcome = processor
        .process(signed, &CancelFlag::new())
        .await
        .expect("process");
    assert_eq!(outcome.newly_flagged(), 0);

    let bob = processor.store().lock().await;
    assert!(!exposure_status(&*bob, false).expect("status").should_notify);
}

#[tokio::test]
async fn tampered_wire_bytes_are_rejected() {
    let rak = ReportAuthorizationKey::generate();
    let signed = create_signed_report(&rak, MemoType::CovidWatchV1, b"memo", 3, 9).expect("sign");
    let mut wire = encode_signed_report(&signed).expect("encode");

    // flip a bit in the start index
    wire[64] ^= 0x01;
    let tampered = decode_signed_report(&wire).expect("still decodes");

    let processor = ReportProcessor::new(Arc::new(Mutex::new(
        SqliteStore::open_memory().expect("store"),
    )));
    let err = processor
        .process(tampered.clone(), &CancelFlag::new())
        .await
        .expect_err("bad signature");
    assert!(!err.is_retryable());

    let store = processor.store().lock().await;
    assert!(signed_reports::get(store.conn(), &tampered.signature_bytes).is_err());
}
