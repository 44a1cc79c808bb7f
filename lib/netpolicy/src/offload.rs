// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The bridge between tethering control logic and a hardware offload
//! backend.
//!
//! Every control operation is a single best-effort attempt: the
//! backend's success flag and error string are logged and collapsed
//! into a bool for the caller. A transport failure is reported the
//! same way, never raised. Asynchronous backend events are queued on a
//! channel and delivered in order from whichever single thread calls
//! [`OffloadControlBridge::dispatch_pending`].

use crate::Result;
use netpolicy_api::ForwardedStats;
use netpolicy_api::OffloadEvent;
use slog::error;
use slog::info;
use slog::Logger;
use std::sync::mpsc;

/// The outcome of one backend control operation.
#[derive(Clone, Debug, Default)]
pub struct CbResults {
    pub success: bool,
    pub err_msg: String,
}

impl CbResults {
    pub fn ok() -> Self {
        CbResults { success: true, err_msg: String::new() }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        CbResults { success: false, err_msg: msg.into() }
    }
}

/// The transport seam to the offload hardware. An `Err` from any
/// method means the backend was unreachable, as opposed to reachable
/// and refusing.
pub trait OffloadBackend: Send {
    fn init_offload(
        &mut self,
        events: mpsc::Sender<OffloadEvent>,
    ) -> Result<CbResults>;
    fn stop_offload(&mut self) -> Result<CbResults>;
    fn set_local_prefixes(&mut self, prefixes: &[String])
        -> Result<CbResults>;
    fn set_data_limit(&mut self, iface: &str, limit: i64)
        -> Result<CbResults>;
    fn set_upstream_parameters(
        &mut self,
        iface: &str,
        v4_addr: &str,
        v4_gateway: &str,
        v6_gateways: &[String],
    ) -> Result<CbResults>;
    fn add_downstream(&mut self, iface: &str, prefix: &str)
        -> Result<CbResults>;
    fn remove_downstream(
        &mut self,
        iface: &str,
        prefix: &str,
    ) -> Result<CbResults>;

    /// Forwarded byte counters for `upstream` since the last query.
    fn get_forwarded_stats(&mut self, upstream: &str) -> Result<(i64, i64)>;
}

/// Receives the backend's asynchronous notifications. All methods are
/// delivered from the one thread driving `dispatch_pending`.
pub trait ControlCallback: Send {
    fn on_started(&mut self) {}
    fn on_stopped_error(&mut self) {}
    fn on_stopped_unsupported(&mut self) {}
    fn on_support_available(&mut self) {}
    fn on_stopped_limit_reached(&mut self) {}
    fn on_nat_timeout_update(
        &mut self,
        _proto: i32,
        _src_addr: &str,
        _src_port: u16,
        _dst_addr: &str,
        _dst_port: u16,
    ) {
    }
}

pub struct OffloadControlBridge {
    backend: Box<dyn OffloadBackend>,
    callback: Box<dyn ControlCallback>,
    active: bool,
    events: Option<mpsc::Receiver<OffloadEvent>>,
    log: Logger,
}

impl OffloadControlBridge {
    pub fn new(
        backend: Box<dyn OffloadBackend>,
        callback: Box<dyn ControlCallback>,
        log: Logger,
    ) -> Self {
        OffloadControlBridge {
            backend,
            callback,
            active: false,
            events: None,
            log,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Bring the backend up. A second call while active is a no-op
    /// reporting success.
    pub fn init_offload_control(&mut self) -> bool {
        if self.active {
            return true;
        }

        let (tx, rx) = mpsc::channel();
        let res = self.backend.init_offload(tx);
        let ok = self.record("initOffloadControl()", res);
        if ok {
            self.active = true;
            self.events = Some(rx);
            self.callback.on_started();
        }
        ok
    }

    pub fn stop_offload_control(&mut self) -> bool {
        let res = self.backend.stop_offload();
        let ok = self.record("stopOffloadControl()", res);
        self.active = false;
        self.events = None;
        ok
    }

    pub fn set_local_prefixes(&mut self, prefixes: &[String]) -> bool {
        if !self.active {
            return false;
        }
        let msg = format!("setLocalPrefixes([{}])", prefixes.join(", "));
        let res = self.backend.set_local_prefixes(prefixes);
        self.record(&msg, res)
    }

    pub fn set_data_limit(&mut self, iface: &str, limit: i64) -> bool {
        if !self.active {
            return false;
        }
        let msg = format!("setDataLimit({}, {})", iface, limit);
        let res = self.backend.set_data_limit(iface, limit);
        self.record(&msg, res)
    }

    pub fn set_upstream_parameters(
        &mut self,
        iface: &str,
        v4_addr: &str,
        v4_gateway: &str,
        v6_gateways: &[String],
    ) -> bool {
        if !self.active {
            return false;
        }
        let msg = format!(
            "setUpstreamParameters({}, {}, {}, [{}])",
            iface,
            v4_addr,
            v4_gateway,
            v6_gateways.join(", ")
        );
        let res = self.backend.set_upstream_parameters(
            iface,
            v4_addr,
            v4_gateway,
            v6_gateways,
        );
        self.record(&msg, res)
    }

    pub fn add_downstream(&mut self, iface: &str, prefix: &str) -> bool {
        if !self.active {
            return false;
        }
        let msg = format!("addDownstream({}, {})", iface, prefix);
        let res = self.backend.add_downstream(iface, prefix);
        self.record(&msg, res)
    }

    pub fn remove_downstream(&mut self, iface: &str, prefix: &str) -> bool {
        if !self.active {
            return false;
        }
        let msg = format!("removeDownstream({}, {})", iface, prefix);
        let res = self.backend.remove_downstream(iface, prefix);
        self.record(&msg, res)
    }

    /// Best-effort forwarded stats: failures produce a zeroed result
    /// and negative backend counters are clamped to zero.
    pub fn get_forwarded_stats(&mut self, upstream: &str) -> ForwardedStats {
        match self.backend.get_forwarded_stats(upstream) {
            Ok((rx, tx)) => ForwardedStats {
                rx_bytes: rx.max(0) as u64,
                tx_bytes: tx.max(0) as u64,
            },
            Err(e) => {
                error!(
                    self.log,
                    "getForwardedStats({}) -> fail: {}", upstream, e
                );
                ForwardedStats::default()
            }
        }
    }

    /// Deliver queued backend events to the callback, in arrival
    /// order, on the calling thread. A stop event deactivates the
    /// bridge.
    pub fn dispatch_pending(&mut self) {
        let Some(rx) = self.events.as_ref() else {
            return;
        };

        let mut pending = Vec::new();
        while let Ok(event) = rx.try_recv() {
            pending.push(event);
        }

        for event in pending {
            match event {
                OffloadEvent::StoppedError => {
                    self.active = false;
                    self.callback.on_stopped_error();
                }
                OffloadEvent::StoppedUnsupported => {
                    self.active = false;
                    self.callback.on_stopped_unsupported();
                }
                OffloadEvent::SupportAvailable => {
                    self.callback.on_support_available();
                }
                OffloadEvent::StoppedLimitReached => {
                    self.callback.on_stopped_limit_reached();
                }
                OffloadEvent::NatTimeoutUpdate(upd) => {
                    self.callback.on_nat_timeout_update(
                        upd.proto,
                        &upd.src_addr,
                        upd.src_port,
                        &upd.dst_addr,
                        upd.dst_port,
                    );
                }
            }
        }

        if !self.active {
            self.events = None;
        }
    }

    fn record(&self, msg: &str, res: Result<CbResults>) -> bool {
        match res {
            Ok(r) if r.success => {
                info!(self.log, "{} -> ok", msg);
                true
            }
            Ok(r) => {
                error!(self.log, "{} -> fail: {}", msg, r.err_msg);
                false
            }
            Err(e) => {
                error!(self.log, "{} -> fail: {}", msg, e);
                false
            }
        }
    }
}
