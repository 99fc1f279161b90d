//! One task per open serial port.
//!
//! The engine asks for a port with [`LinkRequest::Open`]; the task claims the
//! device, reports the outcome and then relays reads as [`LinkEvent::Data`]
//! while carrying out writes, DTR changes and the final close in order.

use std::io;

use sweep_core::error::PortErrorKind;
use sweep_core::link::{DtrLevel, LinkRequest};
use sweep_core::session::Role;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::event::{EventSender, HostEvent, LinkEvent};

const READ_CHUNK: usize = 512;

/// Byte stream with a controllable DTR line.
pub trait DtrPort: AsyncRead + AsyncWrite + Unpin + Send {
    fn set_dtr(&mut self, level: DtrLevel) -> io::Result<()>;
}

impl DtrPort for SerialStream {
    fn set_dtr(&mut self, level: DtrLevel) -> io::Result<()> {
        self.write_data_terminal_ready(level.is_high())
            .map_err(io::Error::from)
    }
}

#[derive(Debug)]
enum PortCommand {
    Write(String),
    SetDtr(DtrLevel),
    Close,
}

/// Sender side of a running port task.
#[derive(Debug)]
pub struct PortHandle {
    commands: mpsc::UnboundedSender<PortCommand>,
}

impl PortHandle {
    /// Opens `path` in the background.
    pub fn open(role: Role, path: String, baud_rate: u32, events: EventSender) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let opened = tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async();
            match opened {
                Ok(port) => {
                    debug!(%role, %path, baud_rate, "serial port opened");
                    run_port(role, port, rx, events).await;
                }
                Err(err) => {
                    warn!(%role, %path, error = %err, "serial port open failed");
                    let _ = events.send(HostEvent::Link {
                        role,
                        event: LinkEvent::OpenFailed(err.to_string()),
                    });
                }
            }
        });
        Self { commands }
    }

    /// Drives an already-open stream.
    #[cfg(test)]
    pub fn attach<P>(role: Role, port: P, events: EventSender) -> Self
    where
        P: DtrPort + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_port(role, port, rx, events));
        Self { commands }
    }

    /// Forwards a non-open request. Returns `false` once the task has ended.
    pub fn send(&self, request: LinkRequest) -> bool {
        let command = match request {
            LinkRequest::Write(text) => PortCommand::Write(text),
            LinkRequest::SetDtr(level) => PortCommand::SetDtr(level),
            LinkRequest::Close => PortCommand::Close,
            LinkRequest::Open { .. } => return true,
        };
        self.commands.send(command).is_ok()
    }
}

async fn run_port<P>(
    role: Role,
    mut port: P,
    mut commands: mpsc::UnboundedReceiver<PortCommand>,
    events: EventSender,
) where
    P: DtrPort,
{
    let emit = |event| {
        let _ = events.send(HostEvent::Link { role, event });
    };
    emit(LinkEvent::Opened);

    let mut buf = [0u8; READ_CHUNK];
    loop {
        tokio::select! {
            read = port.read(&mut buf) => match read {
                Ok(0) => {
                    warn!(%role, "serial port reached end of stream");
                    emit(LinkEvent::Lost);
                    return;
                }
                Ok(n) => emit(LinkEvent::Data(buf[..n].to_vec())),
                Err(err) => {
                    warn!(%role, error = %err, "serial read failed");
                    emit(LinkEvent::Lost);
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(PortCommand::Write(text)) => {
                    let written = async {
                        port.write_all(text.as_bytes()).await?;
                        port.flush().await
                    };
                    if let Err(err) = written.await {
                        warn!(%role, error = %err, "serial write failed");
                        emit(LinkEvent::RequestFailed(PortErrorKind::Write));
                    }
                }
                Some(PortCommand::SetDtr(level)) => {
                    if let Err(err) = port.set_dtr(level) {
                        warn!(%role, error = %err, "DTR toggle failed");
                        emit(LinkEvent::RequestFailed(PortErrorKind::Dtr));
                    }
                }
                Some(PortCommand::Close) | None => {
                    if let Err(err) = port.shutdown().await {
                        debug!(%role, error = %err, "serial shutdown reported an error");
                    }
                    drop(port);
                    emit(LinkEvent::Closed);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    struct FakePort {
        stream: DuplexStream,
        dtr: Arc<Mutex<Vec<DtrLevel>>>,
    }

    impl AsyncRead for FakePort {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FakePort {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }

    impl DtrPort for FakePort {
        fn set_dtr(&mut self, level: DtrLevel) -> io::Result<()> {
            self.dtr.lock().expect("dtr log").push(level);
            Ok(())
        }
    }

    async fn next_link_event(rx: &mut crate::event::EventReceiver) -> LinkEvent {
        match rx.recv().await.expect("event") {
            HostEvent::Link { role, event } => {
                assert_eq!(role, Role::Server);
                event
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn relays_reads_writes_and_dtr_then_closes() {
        let (device, port_side) = tokio::io::duplex(256);
        let dtr = Arc::new(Mutex::new(Vec::new()));
        let (events, mut rx) = crate::event::channel();
        let handle = PortHandle::attach(
            Role::Server,
            FakePort {
                stream: port_side,
                dtr: Arc::clone(&dtr),
            },
            events,
        );
        let (mut device_rx, mut device_tx) = tokio::io::split(device);

        assert_eq!(next_link_event(&mut rx).await, LinkEvent::Opened);

        device_tx.write_all(b"pdc,1,0,3\n").await.expect("device write");
        assert_eq!(
            next_link_event(&mut rx).await,
            LinkEvent::Data(b"pdc,1,0,3\n".to_vec())
        );

        assert!(handle.send(LinkRequest::SetDtr(DtrLevel::Low)));
        assert!(handle.send(LinkRequest::Write(String::from("dect perf stop\n"))));
        let mut received = [0u8; 15];
        device_rx.read_exact(&mut received).await.expect("device read");
        assert_eq!(&received, b"dect perf stop\n");
        assert_eq!(*dtr.lock().expect("dtr log"), [DtrLevel::Low]);

        assert!(handle.send(LinkRequest::Close));
        assert_eq!(next_link_event(&mut rx).await, LinkEvent::Closed);
    }

    #[tokio::test]
    async fn peer_hangup_reports_a_lost_link() {
        let (device, port_side) = tokio::io::duplex(64);
        let (events, mut rx) = crate::event::channel();
        let _handle = PortHandle::attach(
            Role::Server,
            FakePort {
                stream: port_side,
                dtr: Arc::default(),
            },
            events,
        );
        assert_eq!(next_link_event(&mut rx).await, LinkEvent::Opened);
        drop(device);
        assert_eq!(next_link_event(&mut rx).await, LinkEvent::Lost);
    }
}
