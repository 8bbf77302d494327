use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::{info, warn};

use hb_protocol as hb;
use hb_protocol::{Code, HoverboardLink, ParamRegistry};
use hb_transport::{DeliveryClass, Message, MockTransport, Transport};

#[derive(Parser, Debug)]
#[command(
    name = "hb",
    version,
    about = "Hoverboard serial protocol tool",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Class {
    Ack,
    Noack,
}

impl Class {
    fn into_transport(self) -> DeliveryClass {
        match self {
            Class::Ack => DeliveryClass::Ack,
            Class::Noack => DeliveryClass::NoAck,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List protocol codes with their size and access
    Codes {
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a PWM setpoint message from drive and steer
    EncodePwm {
        #[arg(long, allow_hyphen_values = true)]
        drive: i16,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        steer: i16,
        #[arg(long, value_enum, default_value_t = Class::Noack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a PWM setpoint message carrying power limits
    EncodePwmData {
        #[arg(long, allow_hyphen_values = true)]
        drive: i16,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        steer: i16,
        #[arg(long, default_value_t = 100, allow_hyphen_values = true)]
        max_power: i8,
        #[arg(long, default_value_t = -100, allow_hyphen_values = true)]
        min_power: i8,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        minimum_pwm: i8,
        #[arg(long, value_enum, default_value_t = Class::Noack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a buzzer message
    EncodeBuzzer {
        #[arg(long)]
        freq: u8,
        #[arg(long, default_value_t = 0)]
        pattern: u8,
        /// Duration in board ticks
        #[arg(long)]
        len: u16,
        #[arg(long, value_enum, default_value_t = Class::Ack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a motor enable (or disable with --off) message
    EncodeEnable {
        #[arg(long, action = ArgAction::SetTrue)]
        off: bool,
        #[arg(long, value_enum, default_value_t = Class::Ack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a read request for a code
    EncodeRead {
        /// Code name (sens_hall) or value (0x02)
        #[arg(long)]
        code: String,
        #[arg(long, value_enum, default_value_t = Class::Ack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a subscription request; count 0 cancels, -1 is unbounded
    EncodeSubscribe {
        #[arg(long)]
        code: String,
        #[arg(long, default_value_t = hb::UNBOUNDED, allow_hyphen_values = true)]
        count: i32,
        #[arg(long)]
        period_ms: u32,
        /// Class the peer should use for the streamed responses
        #[arg(long, value_enum, default_value_t = Class::Noack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Build a request asking the peer to zero its counters
    EncodeCounterReset {
        #[arg(long, value_enum, default_value_t = Class::Ack)]
        class: Class,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Decode one message given as hex bytes
    Decode {
        /// Bytes as hex, space-separated ("04 03 72 02") or compact ("04037202")
        #[arg(long, value_delimiter = ' ')]
        data: Vec<String>,
    },
    /// Run a host and a simulated board against each other over in-process links
    Simulate {
        /// YAML link config with the subscriptions the host requests
        #[arg(long)]
        config: Option<String>,
        #[arg(long, default_value_t = 200u32)]
        ticks: u32,
        #[arg(long, default_value_t = 10u32)]
        step_ms: u32,
        #[arg(long, default_value_t = 300, allow_hyphen_values = true)]
        drive: i16,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        steer: i16,
        /// Print link statistics every N ticks (0 disables)
        #[arg(long, default_value_t = 50u32)]
        report_every: u32,
        /// Write every message crossing the link to an NDJSON file
        #[arg(long)]
        to: Option<String>,
        /// Dump Prometheus text metrics at the end
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let reg = ParamRegistry::new();

    match cli.command {
        Commands::Codes { json } => list_codes(&reg, json),
        Commands::EncodePwm {
            drive,
            steer,
            class,
            json,
        } => emit(
            &hb::pwm_message(&reg, drive, steer, class.into_transport())?,
            json,
        ),
        Commands::EncodePwmData {
            drive,
            steer,
            max_power,
            min_power,
            minimum_pwm,
            class,
            json,
        } => {
            let limits = hb::PwmLimits {
                max_power,
                min_power,
                minimum_pwm,
            };
            emit(
                &hb::pwm_data_message(&reg, drive, steer, &limits, class.into_transport())?,
                json,
            )
        }
        Commands::EncodeBuzzer {
            freq,
            pattern,
            len,
            class,
            json,
        } => {
            let buzzer = hb::BuzzerData { freq, pattern, len };
            emit(
                &hb::buzzer_message(&reg, &buzzer, class.into_transport())?,
                json,
            )
        }
        Commands::EncodeEnable { off, class, json } => emit(
            &hb::enable_message(&reg, !off, class.into_transport())?,
            json,
        ),
        Commands::EncodeRead { code, class, json } => {
            let code = parse_code(&code)?;
            emit(
                &hb::read_request(&reg, code, class.into_transport())?,
                json,
            )
        }
        Commands::EncodeSubscribe {
            code,
            count,
            period_ms,
            class,
            json,
        } => {
            let req = hb::SubscriptionRequest::new(
                parse_code(&code)?,
                count,
                period_ms,
                class.into_transport(),
            );
            emit(&hb::subscription_message(&reg, &req)?, json)
        }
        Commands::EncodeCounterReset { class, json } => emit(
            &hb::counter_reset_message(&reg, class.into_transport())?,
            json,
        ),
        Commands::Decode { data } => decode(&data),
        Commands::Simulate {
            config,
            ticks,
            step_ms,
            drive,
            steer,
            report_every,
            to,
            metrics,
        } => {
            let opts = SimOptions {
                ticks,
                step_ms,
                drive,
                steer,
                report_every,
                metrics,
            };
            simulate(config.as_deref(), &opts, to.as_deref())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Serialize)]
struct CodeRow {
    code: Code,
    value: u8,
    kind: hb::ParamType,
    size: usize,
    access: hb::Access,
}

fn list_codes(reg: &ParamRegistry, json: bool) -> Result<()> {
    let rows: Vec<CodeRow> = reg
        .iter()
        .map(|d| CodeRow {
            code: d.code(),
            value: d.code().value(),
            kind: d.kind(),
            size: d.size(),
            access: d.access(),
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for r in rows {
        println!(
            "0x{:02X}\t{:<24}\t{:?}\tsize={}\t{:?}",
            r.value,
            r.code.name(),
            r.kind,
            r.size,
            r.access
        );
    }
    Ok(())
}

fn emit(msg: &Message, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(msg)?);
    } else {
        print_message(msg);
    }
    Ok(())
}

fn print_message(msg: &Message) {
    println!("{msg}\t{}", hex_string(&msg.to_bytes()));
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("{b:02X} "));
    }
    s.trim_end().to_string()
}

fn parse_code(s: &str) -> Result<Code> {
    let t = s.trim();
    if let Some(code) = Code::ALL.iter().copied().find(|c| c.name() == t) {
        return Ok(code);
    }
    let no_prefix = t.strip_prefix("0x").unwrap_or(t);
    let value = u8::from_str_radix(no_prefix, 16)
        .map_err(|_| anyhow::anyhow!("unknown code: {t}"))?;
    Ok(Code::try_from(value)?)
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        if t.is_empty() {
            continue;
        }
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        if no_prefix.len() > 2 {
            out.extend(parse_hex_compact(no_prefix)?);
            continue;
        }
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}

fn parse_hex_compact(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(anyhow::anyhow!("odd hex length"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            let pair = s
                .get(i..i + 2)
                .ok_or_else(|| anyhow::anyhow!("invalid hex: {s}"))?;
            u8::from_str_radix(pair, 16).map_err(|e| anyhow::anyhow!("invalid hex: {e}"))
        })
        .collect()
}

fn decode(data_hex: &[String]) -> Result<()> {
    let bytes = parse_hex_bytes(data_hex)?;
    let msg = Message::from_bytes(&bytes)?;
    print_message(&msg);
    let code = Code::try_from(msg.code())?;
    if msg.payload().is_empty() {
        println!("{code}: no payload");
        return Ok(());
    }
    let value = hb::decode_payload(code, msg.payload()).ok_or_else(|| {
        anyhow::anyhow!(
            "payload of {} bytes is too short for {code}",
            msg.payload().len()
        )
    })?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

struct SimOptions {
    ticks: u32,
    step_ms: u32,
    drive: i16,
    steer: i16,
    report_every: u32,
    metrics: bool,
}

/// Wheel speed the simulated board reports per unit of PWM.
const MMS_PER_PWM: i32 = 2;

#[derive(Serialize)]
struct SimRecord<'a> {
    ts: String,
    dir: &'a str,
    class: DeliveryClass,
    command: hb_transport::Command,
    code: u8,
    data: String,
}

fn sim_record_line(dir: &str, msg: &Message) -> String {
    let ts = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into());
    let rec = SimRecord {
        ts,
        dir,
        class: msg.class(),
        command: msg.command(),
        code: msg.code(),
        data: hex_string(msg.payload()).replace(' ', ""),
    };
    serde_json::to_string(&rec).unwrap_or_else(|_| "{}".to_string())
}

/// Move everything `from` has transmitted into `to`, logging each message.
fn shuttle(
    from: &mut HoverboardLink<MockTransport>,
    to: &mut HoverboardLink<MockTransport>,
    dir: &str,
    log: &mut Option<BufWriter<File>>,
) -> Result<()> {
    for bytes in from.transport_mut().io_mut().take_sent() {
        if let Some(w) = log.as_mut() {
            if let Ok(msg) = Message::from_bytes(&bytes) {
                writeln!(w, "{}", sim_record_line(dir, &msg))?;
            }
        }
        if let Err(e) = to.feed(&bytes) {
            warn!(dir, error = %e, "message not applied");
        }
    }
    Ok(())
}

fn simulate(config: Option<&str>, opts: &SimOptions, to: Option<&str>) -> Result<()> {
    let cfg = match config {
        Some(path) => hb::load_link_config(path)?,
        None => hb::LinkConfig {
            subscriptions: vec![hb::SubscriptionPlan {
                code: Code::SensHall,
                count: hb::UNBOUNDED,
                period_ms: 20,
                class: None,
            }],
            ..Default::default()
        },
    };
    let mut log = match to {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let mut host = HoverboardLink::new(MockTransport::new())?;
    let mut board = HoverboardLink::new(MockTransport::new())?;
    let hall_store = hb::new_storage(2 * hb::HALL_SAMPLE_LEN);
    board.update_param_variable(Code::SensHall, hall_store.clone(), 2 * hb::HALL_SAMPLE_LEN)?;
    let mut wheels = [hb::HallSample::default(); 2];

    info!(
        name = cfg.name.as_deref().unwrap_or("-"),
        subscriptions = cfg.subscriptions.len(),
        "simulation starting"
    );
    host.apply_config(&cfg)?;
    host.send_enable(true, DeliveryClass::Ack)?;

    for tick in 1..=opts.ticks {
        host.send_pwm(opts.drive, opts.steer, DeliveryClass::NoAck)?;
        host.tick()?;
        shuttle(&mut host, &mut board, "host->board", &mut log)?;

        board_physics(&board, &mut wheels, opts.step_ms);
        if let Ok(mut s) = hall_store.try_borrow_mut() {
            s.clear();
            s.extend_from_slice(&hb::encode_hall(&wheels));
        }
        board.tick()?;
        shuttle(&mut board, &mut host, "board->host", &mut log)?;

        if opts.report_every > 0 && tick % opts.report_every == 0 {
            host.request_counters(DeliveryClass::NoAck)?;
            println!(
                "t={:>6}ms speed={:6.2}km/h steer={:6.2}km/h\t{}",
                host.transport().now_ms(),
                host.speed_kmh(),
                host.steer_kmh(),
                host.stats()
            );
        }

        host.transport_mut().io_mut().advance(opts.step_ms);
        board.transport_mut().io_mut().advance(opts.step_ms);
    }

    if let Some(w) = log.as_mut() {
        w.flush()?;
    }
    info!(
        speed_kmh = host.speed_kmh(),
        queued = host.tx_buffer_level(),
        "simulation finished"
    );
    if opts.metrics {
        let hub = hb::MetricsHub::new().map_err(anyhow::Error::msg)?;
        hub.observe(&host.stats());
        print!("{}", hub.encode_text());
    }
    Ok(())
}

/// Turn the last setpoint the board received into wheel motion, if motors are enabled.
fn board_physics(
    board: &HoverboardLink<MockTransport>,
    wheels: &mut [hb::HallSample; 2],
    step_ms: u32,
) {
    let bound = |code| {
        board
            .registry()
            .lookup(code)
            .and_then(|d| d.read_bytes())
            .unwrap_or_default()
    };
    let enabled = hb::decode_enable(&bound(Code::EnableMotors)).unwrap_or(false);
    let pwm = hb::decode_pwm(&bound(Code::SetPointPwm)).unwrap_or_default();
    let targets = if enabled { [pwm.left, pwm.right] } else { [0, 0] };
    let step = i64::from(step_ms);
    for (w, pwm) in wheels.iter_mut().zip(targets) {
        w.speed_mm_per_s = pwm.saturating_mul(MMS_PER_PWM);
        let moved = i64::from(w.speed_mm_per_s) * step / 1000;
        w.posn_mm = w.posn_mm.wrapping_add(i32::try_from(moved).unwrap_or(0));
    }
}
