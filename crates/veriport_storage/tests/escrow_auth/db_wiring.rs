#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use veriport_contracts::{
    Aid, Credential, CredentialSubject, Lei, Said, SchemaSaid, UnixTimeMs,
};
use veriport_storage::VerifierDb;

fn said(id: &str) -> Said {
    Said::new(id).unwrap()
}

fn aid(id: &str) -> Aid {
    Aid::new(id).unwrap()
}

fn credential(said_id: &str, holder: &str) -> Credential {
    let mut claims = BTreeMap::new();
    claims.insert("LEI".to_string(), Lei::new("529900T8BM49AURSDO55").unwrap().as_str().to_string());
    Credential {
        said: said(said_id),
        schema: SchemaSaid::new("EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw").unwrap(),
        issuer: aid("EIssuer0000000000000000000000000000000000001"),
        subject: CredentialSubject {
            id: aid(holder),
            claims,
        },
    }
}

#[test]
fn presentation_escrow_is_idempotent_and_keeps_receipt_time() {
    let mut db = VerifierDb::new_in_memory();
    let s = said("ECred0000000000000000000000000000000000000001");

    assert!(db.presentation_escrow(&s, UnixTimeMs(1_000)));
    assert!(!db.presentation_escrow(&s, UnixTimeMs(9_000)));

    let pending = db.presentations().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, s);
    assert_eq!(pending[0].1, UnixTimeMs(1_000));
}

#[test]
fn presentation_rem_clears_pending_entry() {
    let mut db = VerifierDb::new_in_memory();
    let s = said("ECred0000000000000000000000000000000000000002");

    assert!(db.presentation_escrow(&s, UnixTimeMs(50)));
    assert!(db.presentation_rem(&s));
    assert!(!db.presentation_rem(&s));
    assert!(db.presentations().unwrap().is_empty());
}

#[test]
fn presentation_and_revocation_escrows_are_separate() {
    let mut db = VerifierDb::new_in_memory();
    let s = said("ECred0000000000000000000000000000000000000003");

    assert!(db.presentation_escrow(&s, UnixTimeMs(10)));
    assert!(db.revocation_escrow(&s, UnixTimeMs(20)));

    assert_eq!(db.presentations().unwrap().len(), 1);
    assert_eq!(db.revocations().unwrap().len(), 1);

    assert!(db.revocation_rem(&s));
    assert_eq!(db.presentations().unwrap().len(), 1);
    assert!(db.revocations().unwrap().is_empty());
}

#[test]
fn authorization_pin_overwrites_on_reauthorization() {
    let mut db = VerifierDb::new_in_memory();
    let holder = aid("EHolder0000000000000000000000000000000000001");

    assert_eq!(db.authorization(&holder).unwrap(), None);

    db.authorize_commit(&holder, &said("ECredA000000000000000000000000000000000001"));
    assert_eq!(
        db.authorization(&holder).unwrap(),
        Some(said("ECredA000000000000000000000000000000000001"))
    );

    db.authorize_commit(&holder, &said("ECredB000000000000000000000000000000000001"));
    assert_eq!(
        db.authorization(&holder).unwrap(),
        Some(said("ECredB000000000000000000000000000000000001"))
    );
}

#[test]
fn revocation_audit_records_are_keyed_by_said_and_time() {
    let mut db = VerifierDb::new_in_memory();
    let s = said("ECred0000000000000000000000000000000000000004");
    let cred = credential(s.as_str(), "EHolder0000000000000000000000000000000000002");

    db.revocation_audit_commit(&s, UnixTimeMs(111), &cred).unwrap();
    db.revocation_audit_commit(&s, UnixTimeMs(222), &cred).unwrap();

    let audits = db.revocation_audits(&s).unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].0, UnixTimeMs(111));
    assert_eq!(audits[1].0, UnixTimeMs(222));
    assert_eq!(audits[0].1, cred);

    let other = said("ECredX000000000000000000000000000000000000001");
    assert!(db.revocation_audits(&other).unwrap().is_empty());
}

#[test]
fn escrow_iteration_is_key_ordered() {
    let mut db = VerifierDb::new_in_memory();
    db.presentation_escrow(&said("EBcred000000000000000000000000000000000001"), UnixTimeMs(2));
    db.presentation_escrow(&said("EAcred000000000000000000000000000000000001"), UnixTimeMs(1));

    let pending = db.presentations().unwrap();
    assert_eq!(pending[0].0.as_str(), "EAcred000000000000000000000000000000000001");
    assert_eq!(pending[1].0.as_str(), "EBcred000000000000000000000000000000000001");
}
