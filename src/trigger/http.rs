//! http.rs
//! Manual trigger page served over HTTP.
//!
//! - `GET /` renders the page with one button per container
//! - `GET /?containerN` (or `/dispense/N`) dispenses container N, then renders the page
//! - `GET /schedule` returns the configured schedule as JSON
//!
//! Requests are handled one at a time on the serving thread, and a dispense
//! completes before its response is sent.

use log::{error, info, warn};
use serde_json::json;
use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::dispenser::{DispenseError, Dispenser};
use crate::schedule::Schedule;

const PAGE_TEMPLATE: &str = include_str!("page.html");
const QUERY_PREFIX: &str = "/?container";
const PATH_PREFIX: &str = "/dispense/";
const RECV_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Page,
    Dispense(usize),
    Schedule,
    NotFound,
}

/// Maps a request target to a route. The container pattern must start the
/// target; trailing form data (`/?container2=`) is ignored.
pub fn route(url: &str) -> Route {
    if url.is_empty() || url == "/" {
        return Route::Page;
    }
    if url == "/schedule" {
        return Route::Schedule;
    }
    if let Some(rest) = url.strip_prefix(QUERY_PREFIX) {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        return match digits.parse() {
            Ok(slot) => Route::Dispense(slot),
            Err(_) => Route::NotFound,
        };
    }
    if let Some(rest) = url.strip_prefix(PATH_PREFIX) {
        return match rest.trim_end_matches('/').parse() {
            Ok(slot) => Route::Dispense(slot),
            Err(_) => Route::NotFound,
        };
    }
    Route::NotFound
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }
}

pub fn render_page(slots: &[usize], status: &str) -> String {
    let buttons: String = slots
        .iter()
        .map(|s| format!("<a class=\"button\" href=\"{QUERY_PREFIX}{s}\">Container {s}</a>\n"))
        .collect();
    PAGE_TEMPLATE
        .replace("{{status}}", status)
        .replace("{{buttons}}", &buttons)
}

fn schedule_json(schedule: &Schedule) -> String {
    let entries: Vec<_> = schedule
        .entries()
        .iter()
        .map(|e| json!({ "container": e.slot, "time": e.time.to_string() }))
        .collect();
    json!({ "entries": entries }).to_string()
}

/// Handles one request target, dispensing synchronously when it names a container.
pub fn handle(dispenser: &mut Dispenser, schedule: &Schedule, is_get: bool, url: &str) -> Reply {
    if !is_get {
        return Reply::html(405, "method not allowed".into());
    }

    let slots = dispenser.slots();
    match route(url) {
        Route::Page => Reply::html(200, render_page(&slots, "Ready")),
        Route::Schedule => Reply::json(schedule_json(schedule)),
        Route::NotFound => Reply::html(404, render_page(&slots, "Not found")),
        Route::Dispense(slot) => {
            info!("[Http] container {} button pressed", slot);
            match dispenser.dispense(slot) {
                Ok(report) => {
                    let status = format!(
                        "Container {} dispensed ({} pass{})",
                        slot,
                        report.passes,
                        if report.passes == 1 { "" } else { "es" }
                    );
                    Reply::html(200, render_page(&slots, &status))
                }
                Err(e @ DispenseError::UnknownActuator { .. }) => {
                    Reply::html(404, render_page(&slots, &e.to_string()))
                }
                Err(e) => Reply::html(500, render_page(&slots, &e.to_string())),
            }
        }
    }
}

pub struct TriggerServer {
    server: Server,
    schedule: Schedule,
}

impl TriggerServer {
    pub fn bind(addr: &str, schedule: Schedule) -> Result<Self, TriggerError> {
        let server = Server::http(addr).map_err(|e| TriggerError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        info!("[Http] trigger page listening on {}", addr);
        Ok(Self { server, schedule })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Waits up to `timeout` for one request and answers it. Returns whether a
    /// request was handled.
    pub fn handle_next(
        &self,
        dispenser: &mut Dispenser,
        timeout: Duration,
    ) -> Result<bool, TriggerError> {
        match self.server.recv_timeout(timeout)? {
            Some(request) => {
                self.answer(dispenser, request)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Serves until `running` is cleared. An in-flight dispense finishes first.
    pub fn serve(&self, dispenser: &mut Dispenser, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            if let Err(e) = self.handle_next(dispenser, RECV_TIMEOUT) {
                error!("[Http] request failed: {}", e);
            }
        }
        info!("[Http] server stopped");
    }

    fn answer(&self, dispenser: &mut Dispenser, request: Request) -> Result<(), TriggerError> {
        let is_get = matches!(request.method(), Method::Get | Method::Head);
        let reply = handle(dispenser, &self.schedule, is_get, request.url());
        if reply.status >= 400 {
            warn!("[Http] {} {} -> {}", request.method(), request.url(), reply.status);
        }

        let mut response =
            Response::from_string(reply.body).with_status_code(StatusCode(reply.status));
        if let Ok(header) = format!("Content-Type: {}", reply.content_type).parse::<Header>() {
            response = response.with_header(header);
        }
        request.respond(response)?;
        Ok(())
    }
}
