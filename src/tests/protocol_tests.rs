use crate::gather::features::Feature;
use crate::gather::protocol::{
    is_unknown_noop, parse_nak, parse_reply, quote_string, unquote_string, ProtocolError, ReplyLine,
    Severity,
};
use crate::gather::FeatureSet;

#[test]
fn test_quote_plain_string_unchanged() {
    assert_eq!(quote_string("/home"), "/home");
    assert_eq!(quote_string(""), "\"\"");
}

#[test]
fn test_quote_escapes_specials() {
    assert_eq!(quote_string("/my docs"), "\"/my docs\"");
    assert_eq!(quote_string("a\"b"), "\"a\\\"b\"");
    assert_eq!(quote_string("tab\there"), "\"tab\\there\"");
    assert_eq!(unquote_string("\"/my docs\""), "/my docs");
    assert_eq!(unquote_string(&quote_string("c:\\x \"y\"\n")), "c:\\x \"y\"\n");
}

#[test]
fn test_parse_reply_lines() {
    let body = "OPTIONS features=fe01;\n\
                /home 0 SIZE 102400\n\
                \"/data set\" 1 SIZE -2\n\
                /var 1 ERROR \"permission denied\"\n\
                \n";
    let lines = parse_reply(body).unwrap();
    assert_eq!(
        lines,
        vec![
            ReplyLine::Options { features: Some("fe01".to_string()) },
            ReplyLine::Size { disk: "/home".to_string(), level: 0, size: 102_400 },
            ReplyLine::Size { disk: "/data set".to_string(), level: 1, size: -2 },
            ReplyLine::DiskMessage {
                disk: "/var".to_string(),
                level: 1,
                message: "permission denied".to_string()
            },
        ]
    );
}

#[test]
fn test_parse_host_error() {
    let lines = parse_reply("ERROR [host unreachable]\n").unwrap();
    assert_eq!(
        lines,
        vec![ReplyLine::HostMessage { severity: Severity::Error, message: "[host unreachable]".to_string() }]
    );
}

#[test]
fn test_parse_reply_rejects_garbage() {
    let err = parse_reply("/home zero SIZE 10\n").unwrap_err();
    assert!(matches!(err, ProtocolError::BadLine(line) if line == "/home zero SIZE 10"));
}

#[test]
fn test_parse_nak() {
    assert_eq!(parse_nak("ERROR unknown service: noop\n").unwrap(), "unknown service: noop");
    assert!(matches!(parse_nak("garbage"), Err(ProtocolError::NakParse)));
    assert!(matches!(parse_nak("ERROR "), Err(ProtocolError::NakParse)));
    assert!(is_unknown_noop("noop: invalid service"));
    assert!(!is_unknown_noop("access denied"));
}

#[test]
fn test_feature_set_hex() {
    let ours = FeatureSet::ours();
    let parsed = FeatureSet::from_hex(&ours.to_hex()).unwrap();
    assert_eq!(parsed, ours);
    assert!(parsed.has(Feature::ReqOptionsConfig));

    let old = FeatureSet::from_hex("20").unwrap();
    assert!(old.has(Feature::SendsizeReqOptions));
    assert!(!old.has(Feature::ReqOptionsFeatures));
    assert!(FeatureSet::from_hex("zz").is_err());
    assert!(!FeatureSet::empty().has(Feature::CalcsizeEstimate));
}
