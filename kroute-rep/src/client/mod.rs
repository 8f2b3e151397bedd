//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod consts;
pub mod error;
pub mod messages;

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use kroute_utils::protocol::Protocol;
use kroute_utils::{Responder, Sender, UnboundedReceiver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::client::consts::{REP_HEADER_SIZE, REP_SOCKET_PATH};
use crate::client::error::{DecodeError, DecodeResult, Error};
use crate::client::messages::{RepLookupReplyInfo, RepRxMsg, RepTxMsg};
use crate::debug::Debug;

// Client-side endpoint of the route exchange protocol.
//
// Besides the transport itself, it records the redistribute registrations
// made so far so they can be replayed on every reconnection, and the
// nexthop lookups awaiting a reply from the route manager.
#[derive(Debug)]
pub struct RepClient {
    pub protocol: Protocol,
    redist: Mutex<BTreeSet<Protocol>>,
    pending_lookups: Mutex<HashMap<Ipv4Addr, Responder<RepLookupReplyInfo>>>,
}

// ===== impl RepClient =====

impl RepClient {
    pub fn new(protocol: Protocol) -> RepClient {
        RepClient {
            protocol,
            redist: Mutex::new(BTreeSet::new()),
            pending_lookups: Mutex::new(HashMap::new()),
        }
    }

    // Connects to the route manager.
    pub(crate) async fn connect(&self) -> Result<UnixStream, Error> {
        let stream = UnixStream::connect(REP_SOCKET_PATH)
            .await
            .map_err(Error::ConnectError)?;
        Debug::Connected.log();
        Ok(stream)
    }

    // Records a redistribute registration for replay on reconnection.
    pub(crate) fn redist_record(&self, proto: Protocol) {
        self.redist.lock().unwrap().insert(proto);
    }

    // Forgets a redistribute registration.
    pub(crate) fn redist_forget(&self, proto: Protocol) {
        self.redist.lock().unwrap().remove(&proto);
    }

    // Returns the messages that restore this client's registrations on a
    // fresh connection.
    pub(crate) fn replay_messages(&self) -> Vec<RepTxMsg> {
        self.redist
            .lock()
            .unwrap()
            .iter()
            .map(|proto| RepTxMsg::RedistributeAdd(*proto))
            .collect()
    }

    // Registers a nexthop lookup awaiting a reply.
    pub(crate) fn lookup_register(
        &self,
        addr: Ipv4Addr,
        responder: Responder<RepLookupReplyInfo>,
    ) {
        self.pending_lookups.lock().unwrap().insert(addr, responder);
    }

    // Resolves a pending nexthop lookup, if any matches the reply.
    fn lookup_resolve(&self, info: RepLookupReplyInfo) {
        if let Some(responder) =
            self.pending_lookups.lock().unwrap().remove(&info.addr)
        {
            let _ = responder.send(info);
        }
    }

    // Decodes a REP message from the reassembly buffer.
    fn decode_message(&self, data: &mut Vec<u8>) -> DecodeResult<RepRxMsg> {
        if data.len() < REP_HEADER_SIZE as usize {
            return Err(DecodeError::PartialMessage);
        }
        let size = u16::from_be_bytes([data[0], data[1]]);
        if size < REP_HEADER_SIZE {
            return Err(DecodeError::InvalidLength(size));
        }
        if data.len() < size as usize {
            return Err(DecodeError::PartialMessage);
        }
        let cmd = data[2];
        let buf = Bytes::copy_from_slice(
            &data[REP_HEADER_SIZE as usize..size as usize],
        );
        data.drain(0..size as usize);

        RepRxMsg::decode(buf, cmd)
    }

    // Runs a single connection until it fails or the Tx channel closes.
    async fn session(
        &self,
        mut stream: UnixStream,
        rep_txc: &mut UnboundedReceiver<RepTxMsg>,
        rep_rxp: &Sender<RepRxMsg>,
    ) -> Result<(), Error> {
        // Restore redistribute registrations made on previous connections.
        for msg in self.replay_messages() {
            Debug::MsgTx(&msg).log();
            let buf = msg.encode();
            stream.write_all(&buf).await.map_err(Error::WriteError)?;
        }

        let mut buf: [u8; 4096] = [0; 4096];
        let mut data: Vec<u8> = vec![];

        loop {
            tokio::select! {
                msg = rep_txc.recv() => {
                    let Some(msg) = msg else {
                        // The Tx handle was dropped; shut the session down.
                        return Ok(());
                    };
                    let buf = msg.encode();
                    stream
                        .write_all(&buf)
                        .await
                        .map_err(Error::WriteError)?;
                }
                n = stream.read(&mut buf) => {
                    let n = n.map_err(Error::ReadError)?;
                    if n == 0 {
                        return Err(Error::Disconnected);
                    }
                    data.extend_from_slice(&buf[0..n]);

                    loop {
                        match self.decode_message(&mut data) {
                            Ok(RepRxMsg::NexthopLookupReply(info)) => {
                                self.lookup_resolve(info);
                            }
                            Ok(msg) => {
                                let _ = rep_rxp.send(msg).await;
                            }
                            // Try again later once more data arrives.
                            Err(DecodeError::PartialMessage) => break,
                            // Fatal: the stream can't be resynchronized.
                            Err(error) => return Err(error.into()),
                        }
                    }
                }
            }
        }
    }

    // Connects, replays registrations and serves the connection, retrying
    // forever with backoff.
    pub(crate) async fn session_loop(
        &self,
        mut rep_txc: UnboundedReceiver<RepTxMsg>,
        rep_rxp: Sender<RepRxMsg>,
    ) {
        let mut fail = 0usize;
        loop {
            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(error) => {
                    error.log();
                    fail = fail.saturating_add(1);
                    tokio::time::sleep(Duration::from_secs(if fail < 10 {
                        1
                    } else {
                        10
                    }))
                    .await;
                    continue;
                }
            };
            fail = 0;

            match self.session(stream, &mut rep_txc, &rep_rxp).await {
                Ok(()) => return,
                Err(error) => error.log(),
            }

            // Drop lookups that will never get a reply on this connection.
            self.pending_lookups.lock().unwrap().clear();
        }
    }
}

// ===== tests =====
