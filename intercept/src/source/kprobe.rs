//! Kernel-probe capture backend
//!
//! Attaches to the `udp_sendmsg` and `tcp_sendmsg` kernel functions and reads
//! fixed-size records out of the `events` ring buffer. The kernel drops records
//! when we fall behind; nothing here can detect that.

use super::{EventSource, POLL_INTERVAL, StopSignal};
use crate::error::{Error, Result};
use crate::types::{KernelRecord, RawEvent};
use libbpf_rs::{ErrorKind, Link, MapCore, Object, ObjectBuilder, RingBuffer, RingBufferBuilder};
use std::borrow::Cow;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

// Empty when clang/bpftool were missing at build time, see build.rs
static DNS_CAPTURE_OBJ: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/dns_capture.o"));

const RING_BUFFER_MAP: &str = "events";

const PROBES: [(&str, &str); 2] = [
    ("trace_udp_sendmsg", "udp_sendmsg"),
    ("trace_tcp_sendmsg", "tcp_sendmsg"),
];

/// Captures outbound DNS queries with eBPF kprobes
#[derive(Debug, Default)]
pub struct KprobeSource {
    object_path: Option<PathBuf>,
}

impl KprobeSource {
    /// Use the eBPF object embedded at build time
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the eBPF object from `path` instead of the embedded one
    pub fn with_object_path(path: impl Into<PathBuf>) -> Self {
        Self {
            object_path: Some(path.into()),
        }
    }

    fn object_bytes(&self) -> Result<Cow<'static, [u8]>> {
        match &self.object_path {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                if bytes.is_empty() {
                    return Err(Error::InvalidConfig(format!("eBPF object {} is empty", path.display())));
                }
                Ok(Cow::Owned(bytes))
            }
            None if DNS_CAPTURE_OBJ.is_empty() => Err(Error::RuntimeRequirements(
                "no eBPF object was embedded at build time (clang or bpftool missing); pass --bpf-object <path>"
                    .to_string(),
            )),
            None => Ok(Cow::Borrowed(DNS_CAPTURE_OBJ)),
        }
    }
}

impl EventSource for KprobeSource {
    fn name(&self) -> &'static str {
        "kprobe"
    }

    fn run(self: Box<Self>, sink: kanal::Sender<RawEvent>, stop: StopSignal) -> Result<()> {
        check_runtime_requirements()?;
        raise_memlock_rlimit();

        let object_bytes = self.object_bytes()?;
        let manager = EbpfManager::load_and_attach(&object_bytes)?;

        let sink_closed = Rc::new(Cell::new(false));
        let ringbuf = manager.create_ringbuffer({
            let sink_closed = sink_closed.clone();
            move |data: &[u8]| -> i32 {
                let Some(record) = KernelRecord::from_sample(data) else {
                    return 0;
                };
                match sink.send(RawEvent::Packet(record.to_packet_event())) {
                    Ok(()) => 0,
                    Err(_) => {
                        // Non-zero stops the current poll
                        sink_closed.set(true);
                        -1
                    }
                }
            }
        })?;

        log::info!("kprobes attached to udp_sendmsg and tcp_sendmsg, reading ring buffer");

        let finish = loop {
            let result = ringbuf.poll(POLL_INTERVAL);
            let error_kind = result.as_ref().err().map(|err| err.kind());
            match after_poll(error_kind, sink_closed.get(), stop.is_stopped()) {
                PollStep::Continue => {}
                PollStep::Report => {
                    if let Err(err) = &result {
                        log::warn!("ring buffer read failed: {}", err);
                    }
                }
                PollStep::Finish(finish) => break finish,
            }
        };

        match finish {
            Finish::SinkClosed => log::info!("event consumer closed, detaching kprobes"),
            Finish::Stopped => log::info!("stop requested, detaching kprobes"),
        }

        // ring buffer (and the sink inside its callback) goes first, then links and object
        drop(ringbuf);
        drop(manager);
        Ok(())
    }
}

/// What the read loop does after one ring buffer poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    Continue,
    /// Transient read error, log it and keep reading
    Report,
    Finish(Finish),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    /// The callback could not deliver because the receiver is gone
    SinkClosed,
    Stopped,
}

fn after_poll(error: Option<ErrorKind>, sink_closed: bool, stopped: bool) -> PollStep {
    if sink_closed {
        return PollStep::Finish(Finish::SinkClosed);
    }
    if stopped {
        return PollStep::Finish(Finish::Stopped);
    }
    match error {
        None | Some(ErrorKind::Interrupted) => PollStep::Continue,
        Some(_) => PollStep::Report,
    }
}

/// Loaded eBPF object plus the links keeping its probes attached
struct EbpfManager {
    object: Object,
    _links: Vec<Link>,
}

impl EbpfManager {
    fn load_and_attach(object_bytes: &[u8]) -> Result<Self> {
        let mut obj_builder = ObjectBuilder::default();
        let open_object = obj_builder.open_memory(object_bytes)?;
        let mut object = open_object.load()?;

        let mut links = Vec::with_capacity(PROBES.len());
        for (prog_name, kernel_fn) in PROBES {
            let prog = object
                .progs_mut()
                .find(|p| p.name() == prog_name)
                .ok_or_else(|| Error::Ebpf(format!("{} program not found", prog_name).into()))?;

            let link = prog.attach_kprobe(false, kernel_fn)?;
            log::debug!("attached {} to {}", prog_name, kernel_fn);
            links.push(link);
        }

        Ok(Self { object, _links: links })
    }

    fn create_ringbuffer<F>(&'_ self, callback: F) -> Result<RingBuffer<'_>>
    where
        F: FnMut(&[u8]) -> i32 + 'static,
    {
        let rb_map = self
            .object
            .maps()
            .find(|m| m.name() == RING_BUFFER_MAP)
            .ok_or_else(|| Error::Ebpf("events ring buffer map not found".into()))?;

        let mut builder = RingBufferBuilder::new();
        builder.add(&rb_map, callback)?;
        let ringbuf = builder.build()?;

        Ok(ringbuf)
    }
}

/// Kernels before 5.11 charge BPF maps against RLIMIT_MEMLOCK
fn raise_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        log::warn!("could not remove memlock limit: {}", std::io::Error::last_os_error());
    }
}

/// Check runtime requirements for eBPF operation
pub fn check_runtime_requirements() -> Result<()> {
    let mut errors = Vec::new();

    // CO-RE relocations need kernel BTF
    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        errors.push("BTF support not available - /sys/kernel/btf/vmlinux does not exist".to_string());
        errors.push("Your kernel was not compiled with CONFIG_DEBUG_INFO_BTF=y".to_string());
    }

    if !is_running_as_root() {
        errors.push("Root privileges required - run with sudo".to_string());
        errors.push("eBPF programs require CAP_SYS_ADMIN capability".to_string());
    }

    match procfs::sys::kernel::Version::current() {
        Ok(version) => {
            let (major, minor) = (version.major, version.minor);
            if major < 5 || (major == 5 && minor < 4) {
                errors.push(format!("Kernel {}.{} found, but Linux 5.4+ required for CO-RE support", major, minor));
            } else if major == 5 && minor < 10 {
                log::warn!("Kernel {}.{} found, Linux 5.10+ recommended for better stability", major, minor);
            }
        }
        Err(err) => log::warn!("Could not detect kernel version: {}", err),
    }

    if !errors.is_empty() {
        return Err(Error::RuntimeRequirements(errors.join("\n")));
    }

    Ok(())
}

fn is_running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
