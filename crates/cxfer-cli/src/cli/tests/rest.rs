//! Tests for resume, status, cancel, probe, sweep, usage.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_resume() {
    match parse(&["cxfer", "resume", "abc-123"]) {
        CliCommand::Resume { id, adaptive } => {
            assert_eq!(id, "abc-123");
            assert!(!adaptive);
        }
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_resume_adaptive() {
    match parse(&["cxfer", "resume", "abc-123", "--adaptive"]) {
        CliCommand::Resume { adaptive, .. } => assert!(adaptive),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_status_all_and_one() {
    match parse(&["cxfer", "status"]) {
        CliCommand::Status { id } => assert!(id.is_none()),
        _ => panic!("expected Status"),
    }
    match parse(&["cxfer", "status", "abc-123"]) {
        CliCommand::Status { id } => assert_eq!(id.as_deref(), Some("abc-123")),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["cxfer", "cancel", "abc-123"]) {
        CliCommand::Cancel { id } => assert_eq!(id, "abc-123"),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_cancel_requires_id() {
    assert!(Cli::try_parse_from(["cxfer", "cancel"]).is_err());
}

#[test]
fn cli_parse_maintenance_commands() {
    assert!(matches!(parse(&["cxfer", "probe"]), CliCommand::Probe));
    assert!(matches!(parse(&["cxfer", "sweep"]), CliCommand::Sweep));
    assert!(matches!(parse(&["cxfer", "usage"]), CliCommand::Usage));
}

#[test]
fn governor_follows_flag_or_config_for_transfers_only() {
    let send = parse(&["cxfer", "send", "f", "--url", "u"]);
    assert!(!send.wants_governor(false));
    assert!(send.wants_governor(true));
    let send = parse(&["cxfer", "send", "f", "--url", "u", "--adaptive"]);
    assert!(send.wants_governor(false));
    assert!(!parse(&["cxfer", "status"]).wants_governor(true));
}
