use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Mirrors every log line onto a broadcast channel so the `/api/logs` SSE
/// endpoint can replay them to connected dashboards.
#[derive(Clone)]
pub struct SseMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
        }
    }
}

pub struct SseWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

/// Install the global subscriber. Returns the broadcast sender the web
/// layer subscribes to.
pub fn init() -> tokio::sync::broadcast::Sender<String> {
    let (sender, _) = tokio::sync::broadcast::channel(256);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webtosite=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(SseMakeWriter {
            sender: sender.clone(),
        })
        .init();
    sender
}
