//! Browser console: a single embedded page plus a small JSON API.
//!
//! The server is a bare Tokio accept loop. Each connection carries one
//! request; `/events` keeps its connection open as a server-sent event feed
//! of transcript lines. All mutating routes take their arguments from the
//! query string.

use colored::*;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::session::OutputLine;
use crate::ClientHub;

const MAX_REQUEST_BYTES: usize = 16 * 1024;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Client Hub</title>
<style>
body{margin:0;font-family:system-ui,sans-serif;background:#0d1117;color:#c9d1d9;display:grid;grid-template-columns:320px 1fr;height:100vh}
aside{border-right:1px solid #30363d;padding:12px;overflow:auto}
main{display:flex;flex-direction:column;padding:12px;gap:10px;min-height:0}
button{background:#21262d;color:#c9d1d9;border:1px solid #30363d;border-radius:4px;padding:4px 10px;cursor:pointer}
button:disabled{opacity:.5;cursor:default}
input{background:#010409;color:#c9d1d9;border:1px solid #30363d;border-radius:4px;padding:6px}
#transcript{flex:1;overflow:auto;font-family:monospace;font-size:13px;border:1px solid #30363d;border-radius:4px;padding:8px}
.line{display:flex;gap:6px;margin:4px 0;white-space:pre-wrap;word-break:break-word}
.out .mk{color:#58a6ff}.in .mk{color:#3fb950}.system .mk{color:#79c0ff}
.fmt{border-left:2px solid #a371f7;padding-left:6px}
.tabs button.active{border-color:#58a6ff}
.item{display:flex;gap:6px;align-items:center;padding:4px 0;font-family:monospace;font-size:13px}
.item span{flex:1;overflow:hidden;text-overflow:ellipsis}
#status-dot{width:10px;height:10px;border-radius:50%;background:#f85149;display:inline-block}
#status-dot.connected{background:#3fb950}#status-dot.connecting{background:#e3b341}
#notice{color:#e3b341;min-height:1em}
</style>
</head>
<body>
<aside>
  <h2>Client Hub</h2>
  <div class="tabs"><button id="tab-presets" class="active">Presets</button> <button id="tab-history">History</button></div>
  <div id="pane-presets">
    <p><input id="preset-name" placeholder="Name" size="10"> <input id="preset-command" placeholder="Command" size="12"> <button id="preset-add">Add Preset</button></p>
    <div id="presets"></div>
  </div>
  <div id="pane-history" hidden><div id="history"></div></div>
</aside>
<main>
  <div><input id="address" placeholder="Server Address" size="40"> <button id="connect">Connect</button> <span id="status-dot"></span> <span id="status">Disconnected</span></div>
  <div id="transcript"></div>
  <div id="notice"></div>
  <div><input id="command" placeholder="Type a command..." size="80" disabled> <button id="send" disabled>Send</button></div>
</main>
<script>
const token=new URLSearchParams(location.search).get('token')||'';
const $=id=>document.getElementById(id);
let state=null;
let inputChain=Promise.resolve();
function q(path,params){const u=new URLSearchParams(params||{});if(token)u.set('token',token);const s=u.toString();return s?path+'?'+s:path;}
async function api(method,path,params){
  const r=await fetch(q(path,params),{method});
  const body=await r.json().catch(()=>({}));
  if(!r.ok){$('notice').textContent=body.error||('HTTP '+r.status);throw new Error(body.error);}
  $('notice').textContent='';
  return body;
}
function esc(s){const d=document.createElement('div');d.textContent=s;return d.innerHTML;}
function renderTranscript(){
  const box=$('transcript');box.innerHTML='';
  for(const l of state.transcript){
    const v=state.formatted[l.id]||{};
    const row=document.createElement('div');row.className='line '+l.kind;
    const mk=l.kind==='out'?'&rsaquo;':l.kind==='in'?'&lsaquo;':'&bull;';
    const shown=v.show_formatted&&v.text?'<div class="fmt">'+esc(v.text)+'</div>':esc(l.text);
    let tools='';
    if(l.kind==='in'&&state.formatter){
      tools=v.formatting?' <em>formatting…</em>':' <button data-fmt="'+l.id+'">Format</button>';
      if(v.text)tools+=' <button data-toggle="'+l.id+'">'+(v.show_formatted?'Raw':'Formatted')+'</button>';
    }
    row.innerHTML='<span class="mk">'+mk+'</span><div>'+shown+tools+'</div>';
    box.appendChild(row);
  }
  box.scrollTop=box.scrollHeight;
}
function renderSide(){
  const p=$('presets');p.innerHTML=state.presets.length?'':'<p>No saved presets.</p>';
  for(const pr of state.presets){
    const d=document.createElement('div');d.className='item';
    d.innerHTML='<span>'+esc(pr.name)+'</span><button data-apply="'+pr.id+'">Use</button><button data-del="'+pr.id+'">Delete</button>';
    p.appendChild(d);
  }
  const h=$('history');h.innerHTML=state.history.length?'':'<p>No commands in history.</p>';
  state.history.forEach((c,i)=>{const d=document.createElement('div');d.className='item';d.innerHTML='<span>'+esc(c)+'</span><button data-recall="'+i+'">Use</button>';h.appendChild(d);});
}
function renderStatus(){
  const s=state.state;
  $('status').textContent=s[0].toUpperCase()+s.slice(1);
  $('status-dot').className=s;
  $('connect').textContent=s==='connected'?'Disconnect':s==='connecting'?'Connecting...':'Connect';
  $('connect').disabled=s==='connecting';
  $('address').disabled=s!=='disconnected';
  $('command').disabled=s!=='connected';
  $('send').disabled=s!=='connected';
}
async function refresh(syncInput){
  state=await api('GET','/api/state');
  if(!$('address').value)$('address').value=state.address||state.default_address;
  if(syncInput)$('command').value=state.input;
  renderStatus();renderSide();renderTranscript();
}
$('connect').onclick=async()=>{
  if(state.state==='connected')await api('POST','/api/disconnect');
  else await api('POST','/api/connect',{address:$('address').value});
  refresh();
};
async function send(){const text=$('command').value;await inputChain;await api('POST','/api/command',{text});refresh(true);}
$('send').onclick=send;
$('command').addEventListener('input',e=>{const text=e.target.value;inputChain=inputChain.then(()=>api('POST','/api/input',{text})).catch(()=>{});});
$('command').addEventListener('keydown',async e=>{
  if(e.key==='Enter'){send();}
  else if(e.key==='ArrowUp'){e.preventDefault();await inputChain;const r=await api('POST','/api/history/older');if(r.input!==null)$('command').value=r.input;}
  else if(e.key==='ArrowDown'){e.preventDefault();await inputChain;const r=await api('POST','/api/history/newer');if(r.input!==null)$('command').value=r.input;}
});
$('preset-add').onclick=async()=>{
  await api('POST','/api/presets',{name:$('preset-name').value,command:$('preset-command').value});
  $('preset-name').value='';$('preset-command').value='';refresh();
};
document.body.addEventListener('click',async e=>{
  const t=e.target.dataset;if(!t)return;
  if(t.apply){await inputChain;await api('POST','/api/presets/apply',{id:t.apply});refresh(true);}
  if(t.del){await api('POST','/api/presets/delete',{id:t.del});refresh();}
  if(t.recall){await inputChain;await api('POST','/api/history/recall',{index:t.recall});refresh(true);}
  if(t.fmt){const p=api('POST','/api/format',{line:t.fmt});refresh();await p.catch(()=>{});refresh();}
  if(t.toggle){await api('POST','/api/format/toggle',{line:t.toggle});refresh();}
});
$('tab-presets').onclick=()=>{$('pane-presets').hidden=false;$('pane-history').hidden=true;$('tab-presets').className='active';$('tab-history').className='';};
$('tab-history').onclick=()=>{$('pane-presets').hidden=true;$('pane-history').hidden=false;$('tab-history').className='active';$('tab-presets').className='';};
const es=new EventSource(q('/events'));
es.onmessage=()=>refresh(false);
refresh(true);
</script>
</body>
</html>"##;

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Percent-decoding for URL query parameters (`+` is a space).
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
}

/// Parse a request head. `Ok(None)` means more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<HttpRequest>, String> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    }
    let method = req.method.unwrap_or("GET").to_string();
    let target = req.path.unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, parse_query(q)),
        None => (target, HashMap::new()),
    };
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();
    Ok(Some(HttpRequest {
        method,
        path: path.to_string(),
        query,
        headers,
    }))
}

/// Check the request against the configured token, from either an
/// `Authorization: Bearer` header or a `token` query parameter.
pub fn authorized(req: &HttpRequest, token: Option<&str>) -> bool {
    let Some(expected) = token else {
        return true;
    };
    let presented = req
        .headers
        .get("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| req.query.get("token").map(String::as_str))
        .unwrap_or("");
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_string(value)
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    pub fn error(status: u16, msg: impl std::fmt::Display) -> Self {
        Self::json(status, &json!({ "error": msg.to_string() }))
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
        }
    }

    fn from_hub_error(e: &HubError) -> Self {
        let status = match e {
            HubError::UnknownLine(_) | HubError::UnknownPreset(_) | HubError::HistoryIndex(_) => {
                404
            }
            e if e.is_validation() => 400,
            HubError::Provider { .. } | HubError::Http(_) | HubError::MissingApiKey(_) => 502,
            _ => 500,
        };
        Self::error(status, e)
    }

    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len(),
            self.body,
        )
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn param<'a>(req: &'a HttpRequest, key: &str) -> Result<&'a str, HttpResponse> {
    req.query
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| HttpResponse::error(400, format!("missing query parameter '{key}'")))
}

fn param_num<T: std::str::FromStr>(req: &HttpRequest, key: &str) -> Result<T, HttpResponse> {
    let raw = param(req, key)?;
    raw.parse()
        .map_err(|_| HttpResponse::error(400, format!("'{key}' must be a number, got '{raw}'")))
}

fn state(hub: &ClientHub) -> HttpResponse {
    HttpResponse::json(200, &hub.snapshot())
}

/// Handle every route except `/events`, which needs the raw stream.
pub async fn route(hub: &ClientHub, req: &HttpRequest) -> HttpResponse {
    match handle(hub, req).await {
        Ok(resp) | Err(resp) => resp,
    }
}

async fn handle(hub: &ClientHub, req: &HttpRequest) -> Result<HttpResponse, HttpResponse> {
    let session = &hub.session;
    let hub_err = |e: HubError| HttpResponse::from_hub_error(&e);
    let resp = match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/") => HttpResponse::html(INDEX_HTML),
        ("GET", "/api/state") => state(hub),
        ("POST", "/api/connect") => {
            let address = req
                .query
                .get("address")
                .cloned()
                .unwrap_or_else(|| hub.default_address.clone());
            session.request_connect(&address).map_err(hub_err)?;
            state(hub)
        }
        ("POST", "/api/disconnect") => {
            session.request_disconnect().map_err(hub_err)?;
            state(hub)
        }
        ("POST", "/api/command") => {
            let line = match req.query.get("text") {
                Some(text) => session.submit_command(text),
                None => session.submit_input(),
            }
            .map_err(hub_err)?;
            HttpResponse::json(200, &json!({ "line": line }))
        }
        ("POST", "/api/input") => {
            session.set_input(req.query.get("text").map(String::as_str).unwrap_or(""));
            HttpResponse::json(200, &json!({ "input": session.input() }))
        }
        ("POST", "/api/history/older") => {
            HttpResponse::json(200, &json!({ "input": session.history_older() }))
        }
        ("POST", "/api/history/newer") => {
            HttpResponse::json(200, &json!({ "input": session.history_newer() }))
        }
        ("POST", "/api/history/recall") => {
            let index: usize = param_num(req, "index")?;
            let input = session.recall_history(index).map_err(hub_err)?;
            HttpResponse::json(200, &json!({ "input": input }))
        }
        ("GET", "/api/presets") => HttpResponse::json(200, &hub.presets()),
        ("POST", "/api/presets") => {
            let preset = hub
                .add_preset(param(req, "name")?, param(req, "command")?)
                .map_err(hub_err)?;
            HttpResponse::json(200, &preset)
        }
        ("POST", "/api/presets/delete") => {
            let removed = hub.remove_preset(param(req, "id")?);
            HttpResponse::json(200, &json!({ "removed": removed }))
        }
        ("POST", "/api/presets/apply") => {
            let preset = hub.apply_preset(param(req, "id")?).map_err(hub_err)?;
            HttpResponse::json(200, &json!({ "input": preset.command }))
        }
        ("POST", "/api/format") => {
            let id: u64 = param_num(req, "line")?;
            let formatted = hub.format_line(id).await.map_err(hub_err)?;
            HttpResponse::json(200, &json!({ "formattedOutput": formatted }))
        }
        ("POST", "/api/format/toggle") => {
            let id: u64 = param_num(req, "line")?;
            let shown = session.toggle_formatted(id).map_err(hub_err)?;
            HttpResponse::json(200, &json!({ "show_formatted": shown }))
        }
        (_, path) if is_known_path(path) => HttpResponse::error(405, "method not allowed"),
        _ => HttpResponse::error(404, "not found"),
    };
    Ok(resp)
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/" | "/events"
            | "/api/state"
            | "/api/connect"
            | "/api/disconnect"
            | "/api/command"
            | "/api/input"
            | "/api/history/older"
            | "/api/history/newer"
            | "/api/history/recall"
            | "/api/presets"
            | "/api/presets/delete"
            | "/api/presets/apply"
            | "/api/format"
            | "/api/format/toggle"
    )
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Serve the browser console on `127.0.0.1:port` until the process exits.
pub async fn serve(
    hub: ClientHub,
    port: u16,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    let local = listener.local_addr()?;
    info!(%local, "web console listening");

    eprintln!(
        "{}",
        format!("  Web console running at http://localhost:{}", local.port()).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    serve_listener(listener, hub, token).await?;
    Ok(())
}

/// Accept connections on an already bound listener until accepting fails.
pub async fn serve_listener(
    listener: TcpListener,
    hub: ClientHub,
    token: Option<String>,
) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, hub, token).await {
                warn!(%addr, error = %e, "connection error");
            }
        });
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<HttpRequest>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_request(&buf) {
            Ok(Some(req)) => return Ok(Some(req)),
            Ok(None) if buf.len() < MAX_REQUEST_BYTES => continue,
            Ok(None) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "request head too large",
                ))
            }
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    hub: ClientHub,
    token: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let req = match read_request(&mut stream).await {
        Ok(Some(req)) => req,
        Ok(None) => return Ok(()),
        Err(e) => {
            let resp = HttpResponse::error(400, e);
            stream.write_all(resp.to_http().as_bytes()).await?;
            return Ok(());
        }
    };
    debug!(method = %req.method, path = %req.path, "request");

    if req.path != "/" && !authorized(&req, token.as_deref()) {
        let resp = HttpResponse::error(401, "missing or invalid token");
        stream.write_all(resp.to_http().as_bytes()).await?;
        return Ok(());
    }

    if req.method == "GET" && req.path == "/events" {
        return stream_events(stream, hub).await;
    }

    let resp = route(&hub, &req).await;
    stream.write_all(resp.to_http().as_bytes()).await?;
    Ok(())
}

async fn stream_events(
    mut stream: TcpStream,
    hub: ClientHub,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Subscribe first so nothing appended after the headers is missed.
    let rx = hub.session.subscribe();
    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n";
    stream.write_all(headers.as_bytes()).await?;
    write_events(&mut stream, rx, KEEPALIVE_INTERVAL).await?;
    Ok(())
}

/// Forward appended transcript lines as SSE frames, with a comment frame
/// every `keepalive` so a vanished client shows up as a failed write.
/// Returns once a write fails or the session is gone.
pub async fn write_events<W>(
    out: &mut W,
    rx: broadcast::Receiver<OutputLine>,
    keepalive: Duration,
) -> serde_json::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut events = BroadcastStream::new(rx);
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    loop {
        let frame = tokio::select! {
            item = events.next() => match item {
                Some(Ok(line)) => format!("data: {}\n\n", serde_json::to_string(&line)?),
                // Lagged: the client refreshes full state on every event anyway.
                Some(Err(_)) => continue,
                None => break,
            },
            _ = ticker.tick() => ":keepalive\n\n".to_string(),
        };
        if out.write_all(frame.as_bytes()).await.is_err() || out.flush().await.is_err() {
            debug!("event client went away");
            break;
        }
    }
    Ok(())
}
