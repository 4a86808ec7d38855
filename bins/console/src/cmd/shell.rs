use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use backend_memory::MemoryBroker;
use broker_api::{BrokerBackend, ConnectionProfile, ConsumptionMode, NewTopic};
use sync_engine::{AdminClient, Level, Notification, StartOutcome, SyncError};

use crate::config::{ConsoleConfig, ShellArgs};
use crate::error::ConsoleError;

const HELP: &str = "\
commands:
  profiles                          saved connections
  connect <profile|host>            connect (disconnects first if needed)
  disconnect
  filter [text]                     change the topic filter
  topics                            current topic list
  topic <name>                      partitions and watermarks
  create <name> [partitions] [rf]   create a topic
  select <name..> | select-all      check topics for drop
  drop [name..]                     drop the named or checked topics
  mode <tail|from|last> [n]         consumption mode, n for from/last
  consume <topic>                   start consuming
  stop                              stop consuming
  messages [n]                      buffered messages, newest first
  produce <topic> <key|-> <payload>
  produce-schema <topic> <subject> <key|-> <json object>
  subjects | schema <subject>       schema registry
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Status,
    Profiles,
    Connect(String),
    Disconnect,
    Filter(String),
    Topics,
    Topic(String),
    Create { name: String, partitions: i32, replication: i32 },
    Select(Vec<String>),
    SelectAll,
    Drop(Vec<String>),
    Mode { mode: ConsumptionMode, count: Option<usize> },
    Consume(String),
    Stop,
    Messages(Option<usize>),
    Produce { topic: String, key: String, payload: String, schema: Option<String> },
    Subjects,
    Schema(String),
    Quit,
}

/// First `n` words and the untouched remainder.
fn split_words(s: &str, n: usize) -> (Vec<&str>, &str) {
    let mut words = Vec::with_capacity(n);
    let mut rest = s.trim_start();
    while words.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        words.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (words, rest.trim_end())
}

fn usage(msg: &str) -> ConsoleError {
    ConsoleError::Usage(msg.to_string())
}

fn number<T: std::str::FromStr>(s: &str, what: &str) -> Result<T, ConsoleError> {
    s.parse().map_err(|_| ConsoleError::Usage(format!("{what} must be a number, got '{s}'")))
}

fn key_arg(s: &str) -> String {
    if s == "-" { String::new() } else { s.to_string() }
}

fn parse(line: &str) -> Result<Option<Command>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (head, rest) = split_words(line, 1);
    let args: Vec<&str> = rest.split_whitespace().collect();

    let cmd = match head[0] {
        "help" | "?" => Command::Help,
        "status" => Command::Status,
        "profiles" => Command::Profiles,
        "connect" => match args.as_slice() {
            [target] => Command::Connect(target.to_string()),
            _ => return Err(usage("connect <profile|host>")),
        },
        "disconnect" => Command::Disconnect,
        "filter" => Command::Filter(rest.to_string()),
        "topics" => Command::Topics,
        "topic" => match args.as_slice() {
            [name] => Command::Topic(name.to_string()),
            _ => return Err(usage("topic <name>")),
        },
        "create" => match args.as_slice() {
            [name] => Command::Create { name: name.to_string(), partitions: 1, replication: 1 },
            [name, p] => Command::Create { name: name.to_string(), partitions: number(p, "partitions")?, replication: 1 },
            [name, p, rf] => Command::Create {
                name: name.to_string(),
                partitions: number(p, "partitions")?,
                replication: number(rf, "replication factor")?,
            },
            _ => return Err(usage("create <name> [partitions] [rf]")),
        },
        "select" if !args.is_empty() => Command::Select(args.iter().map(|s| s.to_string()).collect()),
        "select" => return Err(usage("select <name..>")),
        "select-all" => Command::SelectAll,
        "drop" => Command::Drop(args.iter().map(|s| s.to_string()).collect()),
        "mode" => match args.as_slice() {
            [m] => Command::Mode { mode: m.parse().map_err(ConsoleError::Usage)?, count: None },
            [m, n] => {
                let mode = m.parse().map_err(ConsoleError::Usage)?;
                let count = number(n, "count")?;
                if count == 0 {
                    return Err(usage("mode <tail|from|last> [n], n must be positive"));
                }
                Command::Mode { mode, count: Some(count) }
            }
            _ => return Err(usage("mode <tail|from|last> [n]")),
        },
        "consume" => match args.as_slice() {
            [topic] => Command::Consume(topic.to_string()),
            _ => return Err(usage("consume <topic>")),
        },
        "stop" => Command::Stop,
        "messages" => match args.as_slice() {
            [] => Command::Messages(None),
            [n] => Command::Messages(Some(number(n, "limit")?)),
            _ => return Err(usage("messages [n]")),
        },
        "produce" => {
            let (words, payload) = split_words(rest, 2);
            if words.len() < 2 {
                return Err(usage("produce <topic> <key|-> <payload>"));
            }
            Command::Produce {
                topic: words[0].to_string(),
                key: key_arg(words[1]),
                payload: payload.to_string(),
                schema: None,
            }
        }
        "produce-schema" => {
            let (words, payload) = split_words(rest, 3);
            if words.len() < 3 {
                return Err(usage("produce-schema <topic> <subject> <key|-> <json object>"));
            }
            Command::Produce {
                topic: words[0].to_string(),
                key: key_arg(words[2]),
                payload: payload.to_string(),
                schema: Some(words[1].to_string()),
            }
        }
        "subjects" => Command::Subjects,
        "schema" => match args.as_slice() {
            [subject] => Command::Schema(subject.to_string()),
            _ => return Err(usage("schema <subject>")),
        },
        "quit" | "exit" => Command::Quit,
        other => return Err(ConsoleError::Usage(format!("unknown command '{other}', try 'help'"))),
    };
    Ok(Some(cmd))
}

pub async fn run(args: ShellArgs) -> Result<(), ConsoleError> {
    let config = ConsoleConfig::load(&args.config)?;
    tracing::info!(
        config = %args.config,
        profiles = config.broker.profiles.len(),
        topics = config.broker.topics.len(),
        "loaded config"
    );

    let backend: Arc<dyn BrokerBackend> = Arc::new(MemoryBroker::new(config.broker));
    let mut client = AdminClient::new(backend, config.sync);
    let mut notes = client.notifications();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(cmd)) => {
                        if let Err(e) = execute(&mut client, cmd).await {
                            report(&e);
                        }
                    }
                    Err(e) => report(&e),
                }
            }
            escalation = client.next_escalation() => {
                let err = client.handle_escalation(escalation).await;
                println!("! {err}");
                println!("back at the connect screen, use 'connect' to reconnect");
            }
            note = notes.recv() => match note {
                Ok(n) => print_notification(&n),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "notifications lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = client.disconnect().await {
        tracing::warn!(error = %e, "disconnect on exit failed");
    }
    tracing::info!("broker-console stopped");
    Ok(())
}

/// Failures already published as notifications are not printed twice.
fn report(e: &ConsoleError) {
    match e {
        ConsoleError::Sync(SyncError::NotConnected) => println!("! not connected"),
        ConsoleError::Sync(_) => {}
        other => println!("! {other}"),
    }
}

fn print_notification(n: &Notification) {
    match n.level {
        Level::Success => println!("ok: {}", n.message),
        Level::Error => println!("! {}", n.message),
    }
}

async fn execute(client: &mut AdminClient, cmd: Command) -> Result<(), ConsoleError> {
    match cmd {
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
        Command::Profiles => {
            for p in client.saved_profiles().await? {
                let registry = p.schema_registry.as_deref().unwrap_or("-");
                println!("  {:<12} {:<40} registry: {registry}", p.name, p.host);
            }
        }
        Command::Connect(target) => {
            let profile = client
                .saved_profiles()
                .await?
                .into_iter()
                .find(|p| p.name == target)
                .unwrap_or_else(|| ConnectionProfile::adhoc(target));
            let conn = client.connect(profile).await?;
            let registry = if conn.settings.schema_registry_connected { "yes" } else { "no" };
            println!("connected to {} (schema registry: {registry})", conn.settings.name());
        }
        Command::Disconnect => {
            client.disconnect().await?;
            println!("disconnected");
        }
        Command::Status => status(client),
        Command::Filter(text) => client.connection_mut()?.set_filter(text),
        Command::Topics => {
            let conn = client.connection_mut()?;
            let state = conn.topic_list();
            conn.selection.retain_listed(&state.topics);
            if !state.is_current() {
                println!("  (refreshing '{}')", state.filter);
            }
            if let Some(err) = &state.last_error {
                println!("  last error: {err}");
            }
            for t in &state.topics {
                let mark = if conn.selection.is_checked(&t.name) { "[x]" } else { "[ ]" };
                println!("  {mark} {:<32} partitions: {:<4} messages: {}", t.name, t.partition_count, t.message_count);
            }
        }
        Command::Topic(name) => {
            let details = client.connection_mut()?.admin.fetch_topic(&name).await?;
            println!("  {}", details.name);
            for p in details.partitions {
                println!(
                    "    #{:<3} low: {:<8} high: {:<8} messages: {:<8} leader: {} replicas: {:?}",
                    p.id, p.low, p.high, p.message_count, p.leader, p.replicas
                );
            }
        }
        Command::Create { name, partitions, replication } => {
            let mut topic = NewTopic::new(name).with_partitions(partitions);
            topic.replication_factor = replication;
            client.connection_mut()?.create_topic(&topic).await?;
        }
        Command::Select(names) => {
            let conn = client.connection_mut()?;
            for name in names {
                conn.selection.toggle(&name);
            }
        }
        Command::SelectAll => {
            let conn = client.connection_mut()?;
            let topics = conn.topic_list().topics;
            conn.selection.toggle_all(&topics);
        }
        Command::Drop(names) => {
            let conn = client.connection_mut()?;
            if !names.is_empty() {
                conn.selection.clear();
                for name in &names {
                    conn.selection.toggle(name);
                }
            }
            conn.drop_selected().await?;
        }
        Command::Mode { mode, count } => {
            let consumer = &mut client.connection_mut()?.consumer;
            if !consumer.set_mode(mode) || count.is_some_and(|n| !consumer.set_count(n)) {
                println!("! mode can only be changed while stopped");
            }
            println!("mode: {} (n = {})", consumer.mode(), consumer.count());
        }
        Command::Consume(topic) => {
            let consumer = &mut client.connection_mut()?.consumer;
            let mode = consumer.mode();
            match consumer.start(&topic, mode).await? {
                StartOutcome::Started { generation } => {
                    println!("consuming '{topic}' ({mode}), session #{generation}");
                }
                StartOutcome::AlreadyActive => {
                    let active = consumer.session().topic.clone().unwrap_or_default();
                    println!("! already consuming '{active}', stop first");
                }
            }
        }
        Command::Stop => {
            client.connection_mut()?.consumer.stop().await?;
            println!("stopped");
        }
        Command::Messages(limit) => {
            let conn = client.connection_mut()?;
            let Some(view) = conn.consumer.messages() else {
                return Ok(());
            };
            let messages = view.snapshot();
            let limit = limit.unwrap_or(messages.len());
            for m in messages.iter().take(limit) {
                println!("  p{}@{:<6} {:<16} {}", m.partition, m.offset, m.key, m.value);
            }
            println!("  ({} buffered)", messages.len());
        }
        Command::Produce { topic, key, payload, schema } => {
            client
                .connection_mut()?
                .producer
                .send(&topic, &key, &payload, schema.as_deref())
                .await?;
        }
        Command::Subjects => {
            for s in client.connection_mut()?.admin.schema_subjects().await? {
                println!("  {s}");
            }
        }
        Command::Schema(subject) => {
            let schema = client.connection_mut()?.admin.schema(&subject).await?;
            match serde_json::from_str::<serde_json::Value>(&schema) {
                Ok(v) => println!("{v:#}"),
                Err(_) => println!("{schema}"),
            }
        }
    }
    Ok(())
}

fn status(client: &AdminClient) {
    let Some(conn) = client.connection() else {
        println!("disconnected");
        if let Some(err) = client.last_error() {
            println!("  last error: {err}");
        }
        return;
    };
    let session = conn.consumer.session();
    let stats = conn.consumer.bridge_stats();
    println!("connected to {}", conn.settings.name());
    println!(
        "  session: {:?} topic: {} mode: {} n: {}",
        session.status,
        session.topic.as_deref().unwrap_or("-"),
        session.mode,
        conn.consumer.count()
    );
    println!(
        "  buffered: {} ingested: {} dropped: {}",
        conn.consumer.messages().map(|v| v.len()).unwrap_or(0),
        stats.ingested,
        stats.dropped
    );
}
