use super::*;

#[test]
fn ok_and_failed_classification() {
    assert!(ActionStatus::Ok.is_ok());
    assert!(!ActionStatus::Ok.is_failed());
    assert!(ActionStatus::Failed.is_failed());
    assert!(ActionStatus::Aborted.is_failed());
    assert!(!ActionStatus::Aborted.is_ok());
}

#[test]
fn from_result_keeps_abort_distinct_from_failure() {
    let ok: RavelResult<u32> = Ok(7);
    let aborted: RavelResult<u32> = Err(RavelError::Aborted);
    let failed: RavelResult<u32> = Err(RavelError::effect("kernel blew up"));
    assert_eq!(ActionStatus::from_result(&ok), ActionStatus::Ok);
    assert_eq!(ActionStatus::from_result(&aborted), ActionStatus::Aborted);
    assert_eq!(ActionStatus::from_result(&failed), ActionStatus::Failed);
}

#[test]
fn constructors_tag_the_message() {
    assert_eq!(
        RavelError::validation("bad roi").to_string(),
        "validation error: bad roi"
    );
    assert_eq!(
        RavelError::scheduler("pool misuse").to_string(),
        "scheduler error: pool misuse"
    );
    assert_eq!(RavelError::effect("nope").to_string(), "effect error: nope");
}

#[test]
fn anyhow_errors_wrap_transparently() {
    let e: RavelError = anyhow::anyhow!("disk on fire").into();
    assert_eq!(e.to_string(), "disk on fire");
}
