use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use faed_autopilot::protocol::{Command, Notification, Notifier, Response};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// A caller that waits longer than this gets a failure response.
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);
const PORT_ATTEMPTS: u16 = 10;

/// A command on its way to the session, with the slot for its answer.
pub struct Envelope {
    pub command: Command,
    pub reply: oneshot::Sender<Response>,
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<Envelope>,
    pub notifier: Notifier,
}

/// Binds the first free port from `port` upwards and serves the gateway.
pub async fn start_server(port: u16, notifier: Notifier) -> Result<mpsc::Receiver<Envelope>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Envelope>(16);
    let state = Arc::new(AppState { cmd_tx, notifier });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(PORT_ATTEMPTS) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => debug!(port = p, error = %e, "port busy"),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port {port}-{}, stop the old agent first",
            port.saturating_add(PORT_ATTEMPTS - 1)
        )
    })?;

    info!("control page at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "gateway stopped");
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Json<Response> {
    let command: Command = match serde_json::from_value(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "unrecognised command");
            return Json(Response::failed(format!("unrecognised command: {e}")));
        }
    };
    debug!(?command, "POST /command");

    let (reply, answer) = oneshot::channel();
    if state.cmd_tx.send(Envelope { command, reply }).await.is_err() {
        return Json(Response::failed("agent is shutting down"));
    }
    match tokio::time::timeout(RELAY_TIMEOUT, answer).await {
        Ok(Ok(response)) => Json(response),
        Ok(Err(_)) => Json(Response::failed("agent dropped the command")),
        Err(_) => {
            warn!("command answer timed out");
            Json(Response::failed("no answer within 30s"))
        }
    }
}

fn to_sse_event(notification: &Notification) -> Option<Event> {
    Event::default()
        .event(notification.name())
        .json_data(notification)
        .inspect_err(|e| warn!(error = %e, "notification not serialisable"))
        .ok()
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(notification) => to_sse_event(&notification).map(Ok::<_, Infallible>),
        Err(e) => {
            warn!(error = %e, "SSE subscriber lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="fr">
<head>
<meta charset="utf-8">
<title>FAED autopilot</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; background: #f4f6f8; color: #1f2933; }
  h1 { font-size: 1.3rem; }
  .bar { display: flex; gap: .5rem; flex-wrap: wrap; margin-bottom: 1rem; }
  button { padding: .5rem 1rem; border: 0; border-radius: 6px; background: #1e4f8a; color: #fff; cursor: pointer; }
  button.stop { background: #b42318; }
  #progress { height: 10px; background: #d9e2ec; border-radius: 5px; overflow: hidden; margin: 1rem 0; }
  #progress div { height: 100%; width: 0; background: #2f855a; transition: width .3s; }
  #log { background: #fff; border-radius: 6px; padding: 1rem; height: 50vh; overflow-y: auto; font: 12px monospace; }
</style>
</head>
<body>
<h1>FAED autopilot</h1>
<div class="bar">
  <button data-cmd="startLoopProcessing">Démarrer la boucle</button>
  <button data-cmd="stopLoopProcessing" class="stop">Arrêter la boucle</button>
  <button data-cmd="checkAlphaNumeric">Vérifier et lancer</button>
  <button data-cmd="verify">Vérifier</button>
  <button data-cmd="nextStep">Étape suivante</button>
  <button data-cmd="reset">Réinitialiser</button>
  <button data-cmd="ping">Ping</button>
</div>
<div id="progress"><div></div></div>
<div id="dossier"></div>
<pre id="log"></pre>
<script>
  const log = document.getElementById('log');
  const write = (line) => { log.textContent += new Date().toLocaleTimeString() + ' ' + line + '\n'; log.scrollTop = log.scrollHeight; };
  document.querySelectorAll('button[data-cmd]').forEach((b) => b.addEventListener('click', async () => {
    const command = b.dataset.cmd;
    write('> ' + command);
    try {
      const res = await fetch('/command', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify({ command }) });
      write('< ' + JSON.stringify(await res.json()));
    } catch (e) { write('! ' + e); }
  }));
  const events = new EventSource('/events');
  const show = (name) => events.addEventListener(name, (e) => {
    const data = JSON.parse(e.data);
    write('* ' + name + ' ' + e.data);
    if (name === 'progressUpdate') {
      document.querySelector('#progress div').style.width = data.progressPercentage + '%';
      document.getElementById('dossier').textContent = 'Dossier ' + data.dossierText;
    }
  });
  ['stepCompleted', 'actionsComplete', 'progressUpdate', 'loopProcessingStopped', 'startFinalWait', 'done'].forEach(show);
</script>
</body>
</html>
"##;
