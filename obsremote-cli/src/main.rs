mod replay;

use anyhow::Context as _;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use obsremote::{BatchOptions, BatchRequest, Client, CodecKind, ConnectOptions, ConnectionEvent};
use serde::Serialize;
use std::future::Future;
use std::io::{Write, stdout};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

fn main() -> anyhow::Result<()> {
    fn parse_req_data(s: &str) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(s)
    }
    fn parse_batch_data(s: &str) -> serde_json::Result<Vec<BatchRequest>> {
        serde_json::from_str(s)
    }
    let command = clap::command!()
        .arg(
            Arg::new("ws-addr")
                .value_name("ADDRESS")
                .long("ws-addr")
                .short('a')
                .env("OBS_WS_ADDRESS")
                .default_value("localhost")
                .help("OBS websocket address."),
        )
        .arg(
            Arg::new("ws-port")
                .value_name("PORT")
                .long("ws-port")
                .short('p')
                .env("OBS_WS_PORT")
                .default_value("4455")
                .value_parser(value_parser!(u16))
                .help("OBS websocket port."),
        )
        .arg(
            Arg::new("ws-password")
                .value_name("PASSWORD")
                .long("ws-password")
                .short('s')
                .env("OBS_WS_PASSWORD")
                .hide_env_values(true)
                .help("OBS websocket password."),
        )
        .arg(
            Arg::new("msgpack")
                .long("msgpack")
                .action(ArgAction::SetTrue)
                .help("Use the MessagePack sub-protocol instead of JSON"),
        )
        .arg(
            Arg::new("compact")
                .long("compact")
                .short('c')
                .action(ArgAction::SetTrue)
                .help("Compact JSON output"),
        )
        .arg(
            Arg::new("timeout-secs")
                .value_name("SECONDS")
                .long("timeout-secs")
                .short('t')
                .default_value("10")
                .value_parser(value_parser!(u64))
                .help("Give up on connecting or on a response after this long"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("request")
                .about("Send a request and wait for a response")
                .arg(
                    Arg::new("req_type")
                        .value_name("NAME")
                        .required(true)
                        .help("OBS WebSocket protocol request type name."),
                )
                .arg(
                    Arg::new("data")
                        .value_name("DATA")
                        .help("JSON data for the request.")
                        .value_parser(parse_req_data),
                ),
        )
        .subcommand(
            Command::new("batch")
                .about("Send a batch of requests and wait for a response")
                .arg(
                    Arg::new("halt-on-failure")
                        .long("halt-on-failure")
                        .action(ArgAction::SetTrue)
                        .help("Stop processing requests after the first failure"),
                )
                .arg(
                    Arg::new("execution-type")
                        .long("execution-type")
                        .value_name("TYPE")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i32).range(-1..=2))
                        .help("0 serial realtime, 1 serial frame, 2 parallel"),
                )
                .arg(
                    Arg::new("requests")
                        .value_name("DATA")
                        .help("JSON array of requests")
                        .required(true)
                        .value_parser(parse_batch_data),
                ),
        )
        .subcommand(
            Command::new("events").about("Listen for events").arg(
                Arg::new("event-subs")
                    .value_name("BITMASK")
                    .help("Event types bitmask. Defaults to all non-high-volume events.")
                    .value_parser(value_parser!(u32)),
            ),
        )
        .subcommand(
            Command::new("replay")
                .about("Start or stop the replay buffer")
                .arg(
                    Arg::new("action")
                        .value_name("ACTION")
                        .required(true)
                        .value_parser(["start", "stop"]),
                ),
        );
    let matches = command.get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(run(matches))
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    let pretty = !matches.get_flag("compact");
    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout-secs").unwrap());
    let client = Client::new();
    match matches.subcommand() {
        Some(("request", sub_matches)) => {
            let request_type = sub_matches.get_one::<String>("req_type").unwrap();
            let request_data = sub_matches.get_one::<serde_json::Value>("data").cloned();
            connect(&client, &matches, None).await?;
            let response = client
                .call_with_timeout(request_type, request_data, timeout)
                .await;
            client.disconnect().await;
            json_print(pretty, &response?)?;
        }
        Some(("batch", sub_matches)) => {
            let requests = sub_matches
                .get_one::<Vec<BatchRequest>>("requests")
                .unwrap()
                .clone();
            let options = BatchOptions {
                halt_on_failure: Some(sub_matches.get_flag("halt-on-failure")),
                execution_type: sub_matches.get_one::<i32>("execution-type").copied(),
            };
            connect(&client, &matches, None).await?;
            let results = within(timeout, client.call_batch(requests, options)).await;
            client.disconnect().await;
            json_print(pretty, &results?)?;
        }
        Some(("events", sub_matches)) => {
            let event_subscriptions = sub_matches.get_one::<u32>("event-subs").copied();
            let mut lifecycle = client.lifecycle();
            let mut events = client.subscribe_all();
            connect(&client, &matches, event_subscriptions).await?;
            loop {
                tokio::select! {
                    Some(event) = events.recv() => json_print(pretty, &event)?,
                    notice = lifecycle.recv() => match notice {
                        Ok(ConnectionEvent::Closed { code, reason }) => {
                            anyhow::bail!("Connection closed (code {code:?}): {reason}");
                        }
                        Ok(ConnectionEvent::Error { message }) => {
                            tracing::warn!(%message, "Connection error");
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }
        Some(("replay", sub_matches)) => {
            let action = match sub_matches.get_one::<String>("action").map(String::as_str) {
                Some("start") => replay::Action::Start,
                _ => replay::Action::Stop,
            };
            connect(&client, &matches, None).await?;
            replay::run(&client, action, timeout)
                .await
                .with_context(|| format!("{} failed", action.request_type()))?;
        }
        _ => unreachable!(),
    }
    Ok(())
}

async fn within<T>(
    timeout: Duration,
    future: impl Future<Output = obsremote::Result<T>>,
) -> obsremote::Result<T> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| obsremote::Error::Timeout(timeout))?
}

fn json_print<T: Serialize>(pretty: bool, data: &T) -> anyhow::Result<()> {
    let mut out = stdout().lock();
    json_serialize(pretty, data, &mut out)?;
    writeln!(out)?;
    Ok(())
}

fn json_serialize<T: Serialize, W: Write>(
    pretty: bool,
    data: &T,
    writer: W,
) -> Result<(), serde_json::Error> {
    if pretty {
        data.serialize(&mut serde_json::Serializer::pretty(writer))
    } else {
        data.serialize(&mut serde_json::Serializer::new(writer))
    }
}

async fn connect(
    client: &Client,
    matches: &ArgMatches,
    event_subscriptions: Option<u32>,
) -> anyhow::Result<()> {
    let addr: &String = matches.get_one("ws-addr").unwrap();
    let port: &u16 = matches.get_one("ws-port").unwrap();
    let password = matches.get_one::<String>("ws-password").map(|v| v.as_str());
    let timeout = Duration::from_secs(*matches.get_one::<u64>("timeout-secs").unwrap());
    let codec = if matches.get_flag("msgpack") {
        CodecKind::MsgPack
    } else {
        CodecKind::Json
    };
    let mut options = ConnectOptions::new()
        .with_password(password)
        .with_codec(codec);
    options.event_subscriptions = event_subscriptions;

    let origin = format!("ws://{addr}:{port}");
    let identification = within(timeout, client.connect_with(&origin, options))
        .await
        .with_context(|| format!("Failed to connect to {origin}"))?;
    tracing::debug!(
        obs_web_socket_version = identification.obs_web_socket_version.as_deref(),
        negotiated_rpc_version = identification.negotiated_rpc_version,
        "Connected"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render<T: Serialize>(pretty: bool, data: &T) -> String {
        let mut out = Vec::new();
        json_serialize(pretty, data, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn compact_and_pretty_output() {
        let data = json!({ "outputActive": true });
        assert_eq!(render(false, &data), r#"{"outputActive":true}"#);
        assert_eq!(render(true, &data), "{\n  \"outputActive\": true\n}");
    }

    #[test]
    fn batch_argument_uses_wire_field_names() {
        let requests: Vec<BatchRequest> = serde_json::from_str(
            r#"[{"requestType":"GetVersion"},{"requestType":"SetInputMute","requestData":{"inputName":"Mic","inputMuted":true}}]"#,
        )
        .unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request_type, "GetVersion");
        assert_eq!(requests[1].request_data, Some(json!({ "inputName": "Mic", "inputMuted": true })));
    }

    #[tokio::test]
    async fn within_reports_timeouts() {
        let err = within(Duration::from_millis(5), std::future::pending::<obsremote::Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, obsremote::Error::Timeout(_)));
    }
}
