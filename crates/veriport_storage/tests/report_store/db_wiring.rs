#![forbid(unsafe_code)]

use veriport_contracts::{Aid, Dig, ReportStats, ReportStatus};
use veriport_storage::{VerifierDb, CHUNK_SIZE};

fn aid(id: &str) -> Aid {
    Aid::new(id).unwrap()
}

fn dig(id: &str) -> Dig {
    Dig::new(id).unwrap()
}

fn accepted(submitter: &Aid) -> ReportStats {
    ReportStats::accepted(
        submitter.clone(),
        "report.zip".to_string(),
        "application/zip".to_string(),
    )
}

#[test]
fn accept_commit_wires_stats_status_and_submitter_indexes() {
    let mut db = VerifierDb::new_in_memory();
    let submitter = aid("EHolder0000000000000000000000000000000000001");
    let d = dig("EDig00000000000000000000000000000000000000001");
    let mut stats = accepted(&submitter);
    stats.size = 8192;

    db.report_accept_commit(&d, &stats).unwrap();

    let loaded = db.report_stats(&d).unwrap().unwrap();
    assert_eq!(loaded.status, ReportStatus::Accepted);
    assert_eq!(loaded.size, 8192);
    assert_eq!(db.status_digs(ReportStatus::Accepted).unwrap(), vec![d.clone()]);
    assert!(db.status_digs(ReportStatus::Verified).unwrap().is_empty());
    assert_eq!(db.reports_for(&submitter).unwrap(), vec![d]);
}

#[test]
fn status_commit_moves_digest_between_exactly_one_set() {
    let mut db = VerifierDb::new_in_memory();
    let submitter = aid("EHolder0000000000000000000000000000000000002");
    let d = dig("EDig00000000000000000000000000000000000000002");
    db.report_accept_commit(&d, &accepted(&submitter)).unwrap();

    assert!(db
        .report_status_commit(&d, ReportStatus::Verified, Some("all signed"))
        .unwrap());

    assert!(db.status_digs(ReportStatus::Accepted).unwrap().is_empty());
    assert_eq!(db.status_digs(ReportStatus::Verified).unwrap(), vec![d.clone()]);
    assert!(db.status_digs(ReportStatus::Failed).unwrap().is_empty());

    let stats = db.report_stats(&d).unwrap().unwrap();
    assert_eq!(stats.status, ReportStatus::Verified);
    assert_eq!(stats.message, "all signed");
}

#[test]
fn status_commit_without_message_keeps_previous_message() {
    let mut db = VerifierDb::new_in_memory();
    let submitter = aid("EHolder0000000000000000000000000000000000003");
    let d = dig("EDig00000000000000000000000000000000000000003");
    db.report_accept_commit(&d, &accepted(&submitter)).unwrap();

    assert!(db
        .report_status_commit(&d, ReportStatus::Failed, Some("missing manifest"))
        .unwrap());
    assert!(db.report_status_commit(&d, ReportStatus::Failed, None).unwrap());

    let stats = db.report_stats(&d).unwrap().unwrap();
    assert_eq!(stats.message, "missing manifest");
}

#[test]
fn repeated_same_status_commit_leaves_single_index_entry() {
    let mut db = VerifierDb::new_in_memory();
    let submitter = aid("EHolder0000000000000000000000000000000000004");
    let d = dig("EDig00000000000000000000000000000000000000004");
    db.report_accept_commit(&d, &accepted(&submitter)).unwrap();

    assert!(db.report_status_commit(&d, ReportStatus::Verified, None).unwrap());
    assert!(db.report_status_commit(&d, ReportStatus::Verified, None).unwrap());

    assert_eq!(db.status_digs(ReportStatus::Verified).unwrap(), vec![d]);
}

#[test]
fn reaccept_after_terminal_status_leaves_single_set_membership() {
    let mut db = VerifierDb::new_in_memory();
    let submitter = aid("EHolder0000000000000000000000000000000000005");
    let d = dig("EDig00000000000000000000000000000000000000009");

    db.report_accept_commit(&d, &accepted(&submitter)).unwrap();
    assert!(db
        .report_status_commit(&d, ReportStatus::Failed, Some("bad zip"))
        .unwrap());

    // Re-upload of the same digest goes back to accepted, and only accepted.
    db.report_accept_commit(&d, &accepted(&submitter)).unwrap();
    assert_eq!(db.status_digs(ReportStatus::Accepted).unwrap(), vec![d.clone()]);
    assert!(db.status_digs(ReportStatus::Failed).unwrap().is_empty());
    assert_eq!(db.reports_for(&submitter).unwrap(), vec![d]);
}

#[test]
fn status_commit_for_unknown_digest_returns_false() {
    let mut db = VerifierDb::new_in_memory();
    let d = dig("EDigUnknown0000000000000000000000000000000001");
    assert!(!db.report_status_commit(&d, ReportStatus::Failed, Some("x")).unwrap());
    assert!(db.status_digs(ReportStatus::Failed).unwrap().is_empty());
}

#[test]
fn chunk_round_trip_preserves_bytes_and_order() {
    let mut db = VerifierDb::new_in_memory();
    let d = dig("EDig00000000000000000000000000000000000000005");

    let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 100)).map(|i| (i % 251) as u8).collect();
    for (index, chunk) in payload.chunks(CHUNK_SIZE).enumerate() {
        db.chunk_put(&d, index as u32, chunk);
    }

    let rebuilt: Vec<u8> = db.chunks(&d).flatten().collect();
    assert_eq!(rebuilt, payload);

    // Restartable from index zero.
    let again: Vec<u8> = db.chunks(&d).flatten().collect();
    assert_eq!(again, payload);
}

#[test]
fn chunk_iteration_stops_at_first_missing_index() {
    let mut db = VerifierDb::new_in_memory();
    let d = dig("EDig00000000000000000000000000000000000000006");

    db.chunk_put(&d, 0, b"zero");
    db.chunk_put(&d, 2, b"two");

    let chunks: Vec<Vec<u8>> = db.chunks(&d).collect();
    assert_eq!(chunks, vec![b"zero".to_vec()]);
}

#[test]
fn chunks_clear_removes_whole_range_for_one_digest_only() {
    let mut db = VerifierDb::new_in_memory();
    let d1 = dig("EDig00000000000000000000000000000000000000007");
    let d2 = dig("EDig00000000000000000000000000000000000000008");

    db.chunk_put(&d1, 0, b"a");
    db.chunk_put(&d1, 1, b"b");
    db.chunk_put(&d2, 0, b"c");

    assert_eq!(db.chunks_clear(&d1), 2);
    assert!(db.chunks(&d1).next().is_none());
    assert_eq!(db.chunks(&d2).next(), Some(b"c".to_vec()));
    assert_eq!(db.chunks_clear(&d1), 0);
}
