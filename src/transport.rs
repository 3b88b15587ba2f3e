// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Listening transport
//!
//! Accepts TCP connections and hands each one to the router dispatcher.
//! The accept loop runs until its token is cancelled, which also releases
//! the listening socket.

use crate::actors::{RouterHandle, RouterMessage};
use crate::error::TransportError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A bound listener with a running accept loop
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    token: CancellationToken,
}

impl Listener {
    /// Binds `address` and starts accepting
    pub async fn bind(
        address: &str,
        router: RouterHandle,
        token: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::info!(address = %local_addr, "Listening for channels");

        let accept_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            if router
                                .send(RouterMessage::ChannelAccepted { stream, peer })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
            tracing::debug!(address = %local_addr, "Listener closed");
        });

        Ok(Self { local_addr, token })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and releases the socket
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
