use pingit::{PingitError, Result};

#[test]
fn test_parse_error() {
    let err = PingitError::ParseError("test error".to_string());
    assert_eq!(err.to_string(), "parse error: test error");
}

#[test]
fn test_invalid_url() {
    let err = PingitError::InvalidUrl("not a url".to_string());
    assert_eq!(err.to_string(), "invalid URL: not a url");
}

#[test]
fn test_error_conversion_from_anyhow() {
    let anyhow_err = anyhow::anyhow!("test anyhow error");
    let pingit_err: PingitError = anyhow_err.into();
    assert!(pingit_err.to_string().contains("test anyhow error"));
}

#[test]
fn test_into_storage_relabels_backend_errors() {
    let io = PingitError::Io(std::io::Error::other("disk gone"));
    let err = io.into_storage();
    assert!(err.is_storage_unavailable());
    assert!(err.to_string().contains("disk gone"));

    let already = PingitError::StorageUnavailable("offline".to_string()).into_storage();
    assert_eq!(already.to_string(), "storage unavailable: offline");
}

#[test]
fn test_result_type() {
    fn returns_error() -> Result<()> {
        Err(PingitError::TabNotFound("t1".to_string()))
    }

    match returns_error() {
        Err(PingitError::TabNotFound(id)) => assert_eq!(id, "t1"),
        _ => panic!("Expected TabNotFound"),
    }
}
