use super::*;

#[test]
fn parses_disaster_kind_case_insensitively() {
    assert_eq!("Wildfire".parse::<DisasterKind>(), Ok(DisasterKind::Wildfire));
    assert_eq!(" flood ".parse::<DisasterKind>(), Ok(DisasterKind::Flood));
    assert!("tornado".parse::<DisasterKind>().is_err());
}

#[test]
fn parses_severity() {
    assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
    let err = "extreme".parse::<Severity>().expect_err("unknown");
    assert_eq!(err.to_string(), "unrecognised severity value 'extreme'");
}

#[test]
fn blank_job_ids_are_detected() {
    assert!(JobId::new("").is_blank());
    assert!(!JobId::new("J1").is_blank());
    assert_eq!(JobId::from("J1").to_string(), "J1");
}
