// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A loopback HTTP server answering with canned responses, standing in for the hosting API.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![(
                String::from("Content-Type"),
                String::from("application/json"),
            )],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub target: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }
}

#[derive(Default)]
struct State {
    routes: Mutex<HashMap<String, CannedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct CannedApi {
    port: u16,
    state: Arc<State>,
    stopping: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CannedApi {
    pub fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("binding loopback listener")?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(State::default());
        let stopping = Arc::new(AtomicBool::new(false));

        let worker = {
            let state = state.clone();
            let stopping = stopping.clone();
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            if let Err(e) = Self::serve(&state, stream) {
                                warn!(?e, "Canned API failed to answer");
                            }
                        }
                        Err(e) => warn!(?e, "Canned API failed to accept"),
                    }
                }
            })
        };

        Ok(Self {
            port,
            state,
            stopping,
            worker: Some(worker),
        })
    }

    /// A base URL nothing listens on.
    pub fn unused_url() -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(format!("http://127.0.0.1:{}", port))
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Answer requests for `target` (path and query) with `response`.
    pub fn respond(&self, target: &str, response: CannedResponse) {
        if let Ok(mut routes) = self.state.routes.lock() {
            routes.insert(target.to_owned(), response);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn serve(state: &State, stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;
        let target = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_owned();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
            }
        }
        debug!(%target, "Canned API request");

        let response = state
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&target).cloned())
            .unwrap_or_else(|| CannedResponse::status(404, r#"{"message": "Not Found"}"#));
        if let Ok(mut requests) = state.requests.lock() {
            requests.push(RecordedRequest { target, headers });
        }

        let mut out = stream;
        write!(out, "HTTP/1.1 {} Canned\r\n", response.status)?;
        for (name, value) in &response.headers {
            write!(out, "{}: {}\r\n", name, value)?;
        }
        write!(
            out,
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.body.len(),
            response.body
        )?;
        out.flush()?;
        let _ = out.shutdown(Shutdown::Write);
        Ok(())
    }
}

impl Drop for CannedApi {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Wake the accept loop so it notices.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
