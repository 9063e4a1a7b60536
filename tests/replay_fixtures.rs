use std::time::Duration;

use rconsole::device::DeviceEndpoint;
use rconsole::error::ConsoleError;
use rconsole::session::{
    CommandExecutor, NormalizeOptions, PollExit, ReplayConnector, SessionEvent, SessionRecorder,
};
use rconsole::templates::cisco_ios;

const SHOW_VERSION_FIXTURE: &str = include_str!("fixtures/session_show_version.jsonl");
const PAGER_FIXTURE: &str = include_str!("fixtures/session_pager.jsonl");
const REFUSED_FIXTURE: &str = include_str!("fixtures/session_refused.jsonl");

fn executor(fixture: &str) -> (ReplayConnector, CommandExecutor<ReplayConnector>) {
    let connector = ReplayConnector::from_jsonl(fixture).expect("load fixture");
    let executor = CommandExecutor::new(connector.clone(), cisco_ios(), Duration::from_secs(300));
    (connector, executor)
}

#[tokio::test(start_paused = true)]
async fn fixture_replays_show_version_without_a_console() {
    let (connector, executor) = executor(SHOW_VERSION_FIXTURE);
    let endpoint = DeviceEndpoint::new("R-1", "127.0.0.1", 5004);

    let result = executor
        .execute(&endpoint, "show version")
        .await
        .expect("replay show version");

    assert!(result.success);
    assert!(result.completed);
    assert_eq!(result.exit, Some(PollExit::Completed));
    assert_eq!(
        result.clean_output,
        "Cisco IOS Software, 7200 Software (C7200-ADVENTERPRISEK9-M), Version 15.2(4)S5\n\
         ROM: ROMMON Emulation Microcode\n\
         R-1 uptime is 3 minutes"
    );
    assert_eq!(connector.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn fixture_output_matches_recorded_command_result() {
    let (_, executor) = executor(SHOW_VERSION_FIXTURE);
    let endpoint = DeviceEndpoint::new("R-1", "127.0.0.1", 5004);
    let recorded = SessionRecorder::from_jsonl(SHOW_VERSION_FIXTURE)
        .expect("decode")
        .entries()
        .expect("entries")
        .into_iter()
        .find_map(|entry| match entry.event {
            SessionEvent::CommandFinished { clean_output, .. } => Some(clean_output),
            _ => None,
        })
        .expect("command event");

    let result = executor.execute(&endpoint, "show version").await.expect("replay");
    assert_eq!(result.clean_output, recorded);
}

#[tokio::test(start_paused = true)]
async fn fixture_answers_pager_and_erases_prompt() {
    let (connector, executor) = executor(PAGER_FIXTURE);
    let endpoint = DeviceEndpoint::new("SW-2", "127.0.0.1", 5006);

    let result = executor
        .execute(&endpoint, "show ip interface brief")
        .await
        .expect("replay pager session");

    assert!(result.raw_output.contains("--More--"));
    assert_eq!(
        result.clean_output,
        "Interface  IP-Address  OK? Method Status  Protocol\n\
         Gi0/0  10.0.0.2  YES manual up  up\n\
         Gi0/1  unassigned  YES unset  down  down"
    );
    assert_eq!(connector.remaining(), 0);
}

#[tokio::test(start_paused = true)]
async fn fixture_reports_mismatch_for_other_command() {
    let (_, executor) = executor(SHOW_VERSION_FIXTURE);
    let endpoint = DeviceEndpoint::new("R-1", "127.0.0.1", 5004);

    let err = match executor.execute(&endpoint, "show clock").await {
        Ok(_) => panic!("other command should not replay"),
        Err(err) => err,
    };
    assert!(matches!(err, ConsoleError::ReplayMismatch(_)));
}

#[tokio::test(start_paused = true)]
async fn fixture_reports_mismatch_for_other_endpoint() {
    let (_, executor) = executor(SHOW_VERSION_FIXTURE);
    let endpoint = DeviceEndpoint::new("R-1", "127.0.0.1", 5010);

    let err = executor
        .execute(&endpoint, "show version")
        .await
        .expect_err("wrong port");
    assert!(matches!(err, ConsoleError::ReplayMismatch(_)));
}

#[tokio::test(start_paused = true)]
async fn refused_connection_replays_as_connect_error() {
    let (_, executor) = executor(REFUSED_FIXTURE);
    let endpoint = DeviceEndpoint::new("R-2", "127.0.0.1", 5005);

    let err = executor
        .execute(&endpoint, "show version")
        .await
        .expect_err("refused");
    assert!(err.is_connect_error());
    assert!(err.to_string().contains("Connection refused"));
}

#[tokio::test(start_paused = true)]
async fn normalized_fixture_still_replays() {
    let normalized = SessionRecorder::normalize_jsonl(SHOW_VERSION_FIXTURE, NormalizeOptions::default())
        .expect("normalize");
    let received = normalized
        .lines()
        .filter(|line| line.contains(r#""kind":"received""#))
        .count();
    // The two output chunks of show version are merged into one.
    assert_eq!(received, 6);

    let (_, executor) = executor(&normalized);
    let endpoint = DeviceEndpoint::new("R-1", "127.0.0.1", 5004);
    let result = executor.execute(&endpoint, "show version").await.expect("replay");
    assert!(result.clean_output.ends_with("R-1 uptime is 3 minutes"));
}

#[test]
fn normalize_can_drop_raw_traffic() {
    let options = NormalizeOptions {
        keep_raw_chunks: false,
        ..NormalizeOptions::default()
    };
    let normalized = SessionRecorder::normalize_jsonl(SHOW_VERSION_FIXTURE, options).expect("normalize");
    let kinds: Vec<_> = SessionRecorder::from_jsonl(&normalized)
        .expect("decode")
        .entries()
        .expect("entries")
        .into_iter()
        .map(|entry| match entry.event {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Closed { .. } => "closed",
            SessionEvent::CommandFinished { .. } => "command_finished",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["connected", "closed", "command_finished"]);
}
