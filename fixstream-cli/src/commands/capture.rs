//! `fixstream capture` - record a raw device stream to a file.
//!
//! Runs an engine with a pass-through interpreter: every chunk read from
//! the device is appended to the output file unchanged. Transport failures
//! are handled by the engine's reconnection policy, so a flaky serial
//! adapter or TCP feed keeps capturing across drops. Runs until Ctrl-C or
//! until the reconnection policy gives up.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use clap::Args;
use fixstream::device::{Device, FileDevice, TcpDevice};
use fixstream::engine::{
    Engine, EngineError, Interpreter, Notification, PacketContext, PacketError,
};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info};

use super::config::load_config;
use crate::error::CliError;

/// Size of a single device read.
const CHUNK_SIZE: usize = 4096;

/// How often the capture loop checks for Ctrl-C and engine events.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Read from a file, FIFO or character device
    #[arg(long, conflicts_with = "tcp", required_unless_present = "tcp")]
    pub file: Option<PathBuf>,

    /// Read from a raw TCP stream (host:port)
    #[arg(long)]
    pub tcp: Option<String>,

    /// File to write the captured bytes to
    #[arg(long, short)]
    pub output: PathBuf,

    /// Maximum consecutive reconnection attempts (-1 for unlimited)
    #[arg(long, allow_hyphen_values = true)]
    pub max_attempts: Option<i64>,

    /// Config file (defaults to ~/.fixstream/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Interpreter that records whatever the device yields.
#[derive(Debug)]
struct PassThrough {
    buf: Vec<u8>,
}

impl PassThrough {
    fn new() -> Self {
        Self {
            buf: vec![0; CHUNK_SIZE],
        }
    }
}

impl Interpreter for PassThrough {
    fn read_packet(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut PacketContext<'_>,
    ) -> Result<(), PacketError> {
        let n = device.read(&mut self.buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream").into());
        }
        ctx.record(&self.buf[..n]);
        Ok(())
    }
}

fn device_from(args: &CaptureArgs) -> Option<Box<dyn Device>> {
    if let Some(path) = &args.file {
        return Some(Box::new(FileDevice::new(path)));
    }
    args.tcp
        .as_ref()
        .map(|address| Box::new(TcpDevice::new(address.clone())) as Box<dyn Device>)
}

pub fn run(args: CaptureArgs) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(attempts) = args.max_attempts {
        config.set_max_reconnection_attempts(attempts)?;
    }

    // clap requires one of --file/--tcp; this only guards direct callers
    let Some(device) = device_from(&args) else {
        return Err(EngineError::NoDevice.into());
    };
    let output = File::create(&args.output).map_err(|error| CliError::FileWrite {
        path: args.output.clone(),
        error,
    })?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    let engine = Engine::builder(PassThrough::new()).config(config).build();
    let mut events = engine.subscribe()?;
    engine.start_recording(BufWriter::new(output))?;
    engine.start_with(device)?;
    eprintln!(
        "Capturing to {} (Ctrl-C to stop)",
        args.output.display()
    );

    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Capture interrupted");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        loop {
            match events.try_recv() {
                Ok(event) => report(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Notification stream lagged");
                }
                Err(_) => break,
            }
        }

        if engine.worker_thread().is_none() {
            eprintln!("Reconnection attempts exhausted");
            break;
        }
    }

    engine.stop()?;
    let bytes = engine.stop_recording().unwrap_or(0);
    engine.dispose();

    println!("Captured {} bytes to {}", bytes, args.output.display());
    Ok(())
}

fn report(event: &Notification) {
    match event {
        Notification::DeviceChanged { name } => eprintln!("Connected to {}", name),
        Notification::ConnectionLost(cause) => eprintln!("Connection lost: {}", cause),
        Notification::ExceptionOccurred(cause) => debug!(error = %cause, "Read failed"),
        Notification::WorkerAbandoned { device } => eprintln!(
            "Device {} did not release in time and may stay open",
            device.as_deref().unwrap_or("(unknown)")
        ),
        _ => {}
    }
}
