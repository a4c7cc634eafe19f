//! `auralinkd run`: bind the control socket, spawn the audio engine
//! thread, and run the main thread's accept/poll loop.
//!
//! The control-socket message *handlers* for device enumeration, volume
//! policy, and DSP reload are out of scope per spec.md §1; this module
//! implements only what the engine's own connection state machine needs
//! (connect/disconnect), plus the framing/accept-loop plumbing around it
//! and the `SET_SYSTEM_VOLUME`/`SET_SYSTEM_MUTE` server-state writes spec.md
//! §6 names explicitly. Because the paired
//! client process is likewise out of scope, the audio-socket side of a
//! newly connected stream is stood in by
//! [`auralink_stream::socket::LoopbackAudioSocket`] rather than a real
//! dial-back to a client-bound socket.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Args;
use crossbeam_channel::{Receiver, Sender};

use auralink_config::Config;
use auralink_engine::{AudioThread, DefaultRtPriority, EngineEvent, EngineReply, EngineRequest, RtPriority};
use auralink_format::{AudioFormat, SampleFormat};
use auralink_iodev::{CpalDevice, Direction};
use auralink_proto::control::{ControlMessage, MessageId};
use auralink_proto::{ClientId, StreamId};
use auralink_shm::posix::PosixBacking;
use auralink_shm::server_state::ServerState;
use auralink_shm::Shm;
use auralink_stream::socket::LoopbackAudioSocket;
use auralink_stream::{ConnState, RStream, StreamDirection, StreamFlags};

use crate::iodev_list::{IoDevInfo, IoDevList, ObserverEvent};
use crate::socket_perms::apply_socket_permissions;

#[derive(Args)]
pub struct RunArgs {
    /// Override the configured socket directory.
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Override the configured audio group.
    #[arg(long)]
    audio_group: Option<String>,
}

/// Server-state snapshot published through the seqlock region. A minimal stand-in for the real
/// volume/device-list payload, whose exact shape is policy owned by
/// collaborators out of scope here.
#[derive(Debug, Clone, Copy, Default)]
struct ServerStateSnapshot {
    volume_percent: u32,
    muted: bool,
}

pub fn run(args: RunArgs, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::load_default()?,
    };
    if let Some(dir) = args.socket_dir {
        config.socket_dir = dir;
    }
    if let Some(group) = args.audio_group {
        config.audio_group = group;
    }

    auralink_config::paths::ensure_dir(&config.socket_dir)?;
    if let Err(err) = apply_socket_permissions(&config.socket_dir, &config.audio_group) {
        tracing::warn!(%err, dir = %config.socket_dir.display(), "could not apply socket directory permissions, continuing");
    }

    let server_state = Arc::new(ServerState::new(ServerStateSnapshot::default()));

    let (req_tx, req_rx) = crossbeam_channel::unbounded::<EngineRequest<PosixBacking>>();
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();

    let shutdown = Arc::new(AtomicBool::new(false));
    let engine_shutdown = shutdown.clone();
    let rt_priority = config.engine.rt_priority;
    let _engine_thread = thread::Builder::new()
        .name("auralink-audio".to_string())
        .spawn(move || {
            if let Err(err) = DefaultRtPriority.elevate(rt_priority) {
                tracing::warn!(%err, "failed to elevate audio engine thread priority");
            }
            let mut engine = AudioThread::new(req_rx, reply_tx, event_tx);
            engine.run(&engine_shutdown);
        })?;

    let _event_thread = thread::spawn(move || log_engine_events(event_rx));

    let mut iodev_list = IoDevList::new();
    iodev_list.add_observer(Box::new(|event| match event {
        ObserverEvent::DeviceRemoved(id) => {
            tracing::info!(device_id = id.0, "device removed, attached streams will reattach");
        }
        ObserverEvent::DeviceAdded(info) => {
            tracing::info!(device_id = info.id.0, name = %info.name, "device available");
        }
    }));

    attach_default_hardware_devices(&req_tx, &reply_rx, &mut iodev_list, config.engine.default_buffer_frames);

    let control_path = config.socket_dir.join("control");
    let _ = std::fs::remove_file(&control_path);
    let listener = UnixListener::bind(&control_path)?;
    if let Err(err) = apply_socket_permissions(&control_path, &config.audio_group) {
        tracing::warn!(%err, path = %control_path.display(), "could not apply control socket permissions");
    }
    tracing::info!(path = %control_path.display(), "auralinkd listening for control connections");

    let mut handler = EngineControlHandler {
        requests: req_tx,
        replies: reply_rx,
        server_state,
        default_format: AudioFormat::simple(SampleFormat::S16Le, 48000, 2),
        default_buffer_frames: config.engine.default_buffer_frames,
        default_cb_threshold: config.engine.default_cb_threshold,
        socket_dir: config.socket_dir.clone(),
        next_client_id: AtomicU32::new(1),
        next_stream_seq: HashMap::new(),
    };

    accept_loop(listener, &mut handler)
}

/// Attempt to attach the default cpal output/input devices so streams
/// don't run against the fallback sink unless no hardware is present
///.
fn attach_default_hardware_devices(
    requests: &Sender<EngineRequest<PosixBacking>>,
    replies: &Receiver<EngineReply>,
    iodev_list: &mut IoDevList,
    buffer_frames: u32,
) {
    for direction in [Direction::Out, Direction::In] {
        let backend = Box::new(CpalDevice::new(direction, None, buffer_frames));
        if requests
            .send(EngineRequest::AddDevice { backend, direction })
            .is_err()
        {
            return;
        }
        match replies.recv() {
            Ok(EngineReply::DeviceAdded { device_id }) => {
                iodev_list.register(IoDevInfo {
                    id: device_id,
                    name: format!("default {direction:?} device"),
                    direction,
                });
            }
            Ok(other) => tracing::warn!(reply = ?other, "unexpected reply while adding default device"),
            Err(err) => tracing::warn!(%err, "engine reply channel closed while adding default device"),
        }
    }
}

fn log_engine_events(events: Receiver<EngineEvent>) {
    for event in events {
        match event {
            EngineEvent::StreamReattach { stream_id } => {
                tracing::info!(stream_id = stream_id.0, "stream reattach requested");
            }
            EngineEvent::DeviceError { device_id, message } => {
                tracing::warn!(device_id = device_id.0, %message, "device error");
            }
            EngineEvent::CallbackTimeout { stream_id, total } => {
                tracing::warn!(stream_id = stream_id.0, total, "stream callback deadline missed");
            }
        }
    }
}

/// Minimal [`ControlHandler`] wiring connect/disconnect into the engine's
/// request/reply channels.
struct EngineControlHandler {
    requests: Sender<EngineRequest<PosixBacking>>,
    replies: Receiver<EngineReply>,
    server_state: Arc<ServerState<ServerStateSnapshot>>,
    default_format: AudioFormat,
    default_buffer_frames: u32,
    default_cb_threshold: u32,
    socket_dir: PathBuf,
    next_client_id: AtomicU32,
    next_stream_seq: HashMap<ClientId, u16>,
}

impl EngineControlHandler {
    fn assign_client_id(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed) as u16)
    }

    fn next_stream_id(&mut self, client_id: ClientId) -> StreamId {
        let seq = self.next_stream_seq.entry(client_id).or_insert(0);
        let id = StreamId::new(client_id.0, *seq);
        *seq += 1;
        id
    }

    fn handle(&mut self, client_id: ClientId, msg: ControlMessage) -> anyhow::Result<ControlMessage> {
        match msg.id {
            MessageId::ConnectStream => self.connect_stream(client_id),
            MessageId::DisconnectStream => self.disconnect_stream(&msg.payload),
            MessageId::SetSystemVolume => {
                self.update_server_state(|s| {
                    if let Some(bytes) = msg.payload.get(0..4) {
                        s.volume_percent = u32::from_le_bytes(bytes.try_into().unwrap());
                    }
                });
                Ok(ControlMessage::new(MessageId::VolumeUpdate, msg.payload))
            }
            MessageId::SetSystemMute => {
                self.update_server_state(|s| {
                    s.muted = msg.payload.first().copied().unwrap_or(0) != 0;
                });
                Ok(ControlMessage::new(MessageId::VolumeUpdate, msg.payload))
            }
            // Device enumeration, node selection, and DSP reload policy are
            // out of scope per spec.md §1; acknowledge with an empty reply
            // so a well-behaved client doesn't stall waiting for one.
            MessageId::SwitchIodev
            | MessageId::SetSystemCaptureGain
            | MessageId::SetNodeAttr
            | MessageId::SelectNode
            | MessageId::ReloadDsp => Ok(ControlMessage::new(msg.id, Vec::new())),
            other => Ok(ControlMessage::new(other, Vec::new())),
        }
    }

    fn update_server_state(&self, mutate: impl FnOnce(&mut ServerStateSnapshot)) {
        let mut snapshot = self
            .server_state
            .read(auralink_shm::server_state::STATE_VERSION)
            .unwrap_or_default();
        mutate(&mut snapshot);
        self.server_state.write(snapshot);
    }

    fn connect_stream(&mut self, client_id: ClientId) -> anyhow::Result<ControlMessage> {
        let stream_id = self.next_stream_id(client_id);
        let format = self.default_format;
        let frame_bytes = format.frame_bytes();
        let used_size = (self.default_buffer_frames * frame_bytes) as usize;

        let shm_key = format!("auralink-stream-{}-{}", stream_id.client_id().0, stream_id.local_id());
        let backing = PosixBacking::create(&self.socket_dir, &shm_key, used_size * 2)?;
        let shm = Shm::new(frame_bytes, used_size, backing)?;

        let mut rstream = RStream::new(
            stream_id,
            StreamDirection::Out,
            format,
            self.default_buffer_frames,
            self.default_cb_threshold,
            1,
            StreamFlags::empty(),
            shm,
        )?;
        rstream.transition(ConnState::AwaitingConnect)?;
        rstream.transition(ConnState::ConnectedReady)?;

        self.requests.send(EngineRequest::AddStream {
            stream: Box::new(rstream),
            socket: Box::new(LoopbackAudioSocket::default()),
            preferred_device: None,
        })?;

        match self.replies.recv()? {
            EngineReply::StreamAttached { stream_id, format, .. } => {
                let payload = auralink_proto::StreamConnectedPayload {
                    stream_id: stream_id.0,
                    shm_key,
                    shm_size_bytes: (used_size * 2) as u32,
                    frame_rate_hz: format.frame_rate_hz,
                    channel_count: format.channel_count,
                    err: 0,
                };
                Ok(ControlMessage::new(MessageId::StreamConnected, payload.serialize()))
            }
            EngineReply::Error(message) => {
                tracing::warn!(%message, stream_id = stream_id.0, "stream attach failed");
                let payload = auralink_proto::StreamConnectedPayload {
                    stream_id: stream_id.0,
                    shm_key: String::new(),
                    shm_size_bytes: 0,
                    frame_rate_hz: 0,
                    channel_count: 0,
                    err: -1,
                };
                Ok(ControlMessage::new(MessageId::StreamConnected, payload.serialize()))
            }
            other => anyhow::bail!("unexpected engine reply to AddStream: {other:?}"),
        }
    }

    fn disconnect_stream(&mut self, payload: &[u8]) -> anyhow::Result<ControlMessage> {
        let stream_id = payload
            .get(0..4)
            .map(|b| StreamId(u32::from_le_bytes(b.try_into().unwrap())))
            .ok_or_else(|| anyhow::anyhow!("disconnect payload too short"))?;
        self.requests.send(EngineRequest::RemoveStream { stream_id })?;
        match self.replies.recv()? {
            EngineReply::StreamRemoved { .. } => Ok(ControlMessage::new(MessageId::DisconnectStream, Vec::new())),
            other => anyhow::bail!("unexpected engine reply to RemoveStream: {other:?}"),
        }
    }
}

struct ClientConn {
    stream: UnixStream,
    client_id: ClientId,
}

/// Main thread's control-socket multiplexer.
fn accept_loop(listener: UnixListener, handler: &mut EngineControlHandler) -> anyhow::Result<()> {
    let mut clients: Vec<ClientConn> = Vec::new();

    loop {
        let mut pollfds = Vec::with_capacity(1 + clients.len());
        pollfds.push(libc::pollfd {
            fd: listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        for client in &clients {
            pollfds.push(libc::pollfd {
                fd: client.stream.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }

        // SAFETY: `pollfds` is a valid, correctly-sized array of `pollfd`
        // for the duration of this call; no other thread touches these fds.
        #[allow(unsafe_code)]
        let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }

        if pollfds[0].revents & libc::POLLIN != 0 {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let client_id = handler.assign_client_id();
                    tracing::info!(client_id = client_id.0, "control client connected");
                    let payload = auralink_proto::ClientConnectedPayload {
                        client_id: client_id.0 as u32,
                        server_state_key: "auralink-server-state".to_string(),
                        state_version: auralink_shm::server_state::STATE_VERSION,
                    };
                    let greeting = ControlMessage::new(MessageId::ClientConnected, payload.serialize());
                    let mut conn = ClientConn { stream, client_id };
                    if let Err(err) = greeting.write_to(&mut conn.stream) {
                        tracing::warn!(%err, "failed sending CLIENT_CONNECTED greeting");
                    } else {
                        clients.push(conn);
                    }
                }
                Err(err) => tracing::warn!(%err, "accept failed"),
            }
        }

        let mut dead = Vec::new();
        for (slot, pfd) in pollfds.iter().enumerate().skip(1) {
            if pfd.revents == 0 {
                continue;
            }
            let idx = slot - 1;
            match ControlMessage::read_from(&mut clients[idx].stream) {
                Ok(msg) => {
                    let client_id = clients[idx].client_id;
                    match handler.handle(client_id, msg) {
                        Ok(reply) => {
                            if let Err(err) = reply.write_to(&mut clients[idx].stream) {
                                tracing::warn!(%err, "failed writing control reply");
                                dead.push(idx);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, client_id = client_id.0, "control handler error, closing client");
                            dead.push(idx);
                        }
                    }
                }
                Err(_) => {
                    tracing::info!(client_id = clients[idx].client_id.0, "control client disconnected");
                    dead.push(idx);
                }
            }
        }
        for idx in dead.into_iter().rev() {
            clients.remove(idx);
        }
    }
}
