//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]
#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod debug;
pub mod error;
pub mod fib;
pub mod interface;
pub mod rib;
pub mod server;

use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;
use kroute_rep::client::error::DecodeError;
use kroute_rep::client::messages::{
    RepAddressInfo, RepIfaceInfo, RepRouterIdInfo, RepRxMsg, RepTxMsg,
};
use kroute_utils::{Receiver, Responder, UnboundedSender};

use crate::debug::Debug;
use crate::error::Error;
use crate::fib::KernelFib;
use crate::interface::{InterfaceFlags, Interfaces};
use crate::rib::Rib;
use crate::server::{ConnId, RepServer};

// Route manager input messages.
//
// Client messages come from the per-connection socket tasks; interface and
// address messages come from the platform collaborator watching the kernel.
#[derive(Debug)]
pub enum ManagerMsg {
    ClientConnect {
        msg_tx: UnboundedSender<RepRxMsg>,
        responder: Responder<ConnId>,
    },
    ClientDisconnect(ConnId),
    ClientMsg(ConnId, RepTxMsg),
    ClientError(ConnId, DecodeError),
    IfaceUpd(RepIfaceInfo),
    IfaceDel(RepIfaceInfo),
    AddrAdd(RepAddressInfo),
    AddrDel(RepAddressInfo),
}

pub struct Master<F: KernelFib> {
    // Kernel FIB programming.
    pub fib: F,
    // List of interfaces.
    pub interfaces: Interfaces,
    // RIB.
    pub rib: Rib,
    // Protocol daemon connections.
    pub server: RepServer,
    // Router-ID.
    pub router_id: Option<Ipv4Addr>,
}

// ===== impl Master =====

impl<F> Master<F>
where
    F: KernelFib,
{
    pub fn new(fib: F) -> Self {
        Master {
            fib,
            interfaces: Default::default(),
            rib: Default::default(),
            server: Default::default(),
            router_id: None,
        }
    }

    // Runs the route manager main loop.
    pub async fn run(&mut self, mut msg_rx: Receiver<ManagerMsg>) {
        loop {
            tokio::select! {
                Some(msg) = msg_rx.recv() => {
                    self.process_msg(msg);
                }
                Some(_) = self.rib.update_queue_rx.recv() => {
                    self.rib
                        .process_update_queue(&mut self.fib, &mut self.server)
                        .await;
                }
                else => break,
            }
        }
    }

    // Processes prefixes present in the RIB update queue.
    pub async fn process_update_queue(&mut self) {
        self.rib
            .process_update_queue(&mut self.fib, &mut self.server)
            .await;
    }

    // Processes a single input message.
    pub fn process_msg(&mut self, msg: ManagerMsg) {
        match msg {
            ManagerMsg::ClientConnect { msg_tx, responder } => {
                let conn_id = self.server.accept(msg_tx);

                // Introduce the new daemon to the current interface and
                // Router-ID state.
                self.server.notify(
                    conn_id,
                    RepRxMsg::RouterIdUpd(RepRouterIdInfo::new(
                        self.router_id,
                    )),
                );
                for iface in self.interfaces.iter() {
                    self.server.notify(
                        conn_id,
                        RepRxMsg::IfaceAdd(iface_to_info(iface)),
                    );
                    for addr in &iface.addresses {
                        self.server.notify(
                            conn_id,
                            RepRxMsg::AddressAdd(RepAddressInfo::new(
                                iface.ifindex,
                                *addr,
                            )),
                        );
                    }
                }

                let _ = responder.send(conn_id);
            }
            ManagerMsg::ClientDisconnect(conn_id) => {
                self.server.disconnect(conn_id);
            }
            ManagerMsg::ClientMsg(conn_id, msg) => {
                self.server.process_client_msg(conn_id, msg, &mut self.rib);
            }
            ManagerMsg::ClientError(conn_id, error) => {
                // Framing errors are fatal to the connection.
                Error::ClientDecode(conn_id, error).log();
                self.server.disconnect(conn_id);
            }
            ManagerMsg::IfaceUpd(info) => {
                self.process_iface_upd(info);
            }
            ManagerMsg::IfaceDel(info) => {
                self.process_iface_del(info);
            }
            ManagerMsg::AddrAdd(info) => {
                self.process_addr_add(info);
            }
            ManagerMsg::AddrDel(info) => {
                self.process_addr_del(info);
            }
        }
    }

    // Processes an interface addition or attribute change.
    fn process_iface_upd(&mut self, info: RepIfaceInfo) {
        let mut flags = InterfaceFlags::empty();
        if info.operative {
            flags.insert(InterfaceFlags::OPERATIVE);
        }
        if info.loopback {
            flags.insert(InterfaceFlags::LOOPBACK);
        }

        let old = self
            .interfaces
            .get_by_ifindex(info.ifindex)
            .map(|iface| iface.flags);
        self.interfaces.update(
            info.ifname.clone(),
            info.ifindex,
            info.mtu,
            flags,
        );

        // Fan the event out, distinguishing new interfaces from link state
        // transitions.
        match old {
            None => {
                self.server.notify_all(RepRxMsg::IfaceAdd(info));
            }
            Some(old) => {
                let was_operative = old.contains(InterfaceFlags::OPERATIVE);
                if info.operative && !was_operative {
                    self.iface_connected_routes(info.ifindex, true);
                    self.server.notify_all(RepRxMsg::IfaceUp(info));
                } else if !info.operative && was_operative {
                    self.iface_connected_routes(info.ifindex, false);
                    self.server.notify_all(RepRxMsg::IfaceDown(info));
                }
            }
        }
    }

    // Processes an interface removal.
    fn process_iface_del(&mut self, info: RepIfaceInfo) {
        self.iface_connected_routes(info.ifindex, false);
        self.interfaces.remove(info.ifindex);
        self.server.notify_all(RepRxMsg::IfaceDel(info));
        self.router_id_update();
    }

    // Processes an interface address addition.
    fn process_addr_add(&mut self, info: RepAddressInfo) {
        let Some(iface) = self.interfaces.get_mut_by_ifindex(info.ifindex)
        else {
            return;
        };
        iface.addresses.insert(info.addr);
        let operative = iface.flags.contains(InterfaceFlags::OPERATIVE);

        if operative {
            self.rib.connected_route_add(&info);
        }
        self.server.notify_all(RepRxMsg::AddressAdd(info));
        self.router_id_update();
    }

    // Processes an interface address removal.
    fn process_addr_del(&mut self, info: RepAddressInfo) {
        let Some(iface) = self.interfaces.get_mut_by_ifindex(info.ifindex)
        else {
            return;
        };
        iface.addresses.remove(&info.addr);

        self.rib.connected_route_del(&info);
        self.server.notify_all(RepRxMsg::AddressDel(info));
        self.router_id_update();
    }

    // Adds or removes the connected routes of the given interface.
    fn iface_connected_routes(&mut self, ifindex: u32, add: bool) {
        let Some(iface) = self.interfaces.get_by_ifindex(ifindex) else {
            return;
        };
        for addr in iface.addresses.clone() {
            let info = RepAddressInfo::new(ifindex, addr);
            if add {
                self.rib.connected_route_add(&info);
            } else {
                self.rib.connected_route_del(&info);
            }
        }
    }

    // Recomputes the Router-ID and notifies the daemons when it changes.
    //
    // Loopback addresses are preferred, then the numerically highest address.
    fn router_id_update(&mut self) {
        let router_id = self
            .interfaces
            .iter()
            .flat_map(|iface| {
                iface.addresses.iter().filter_map(move |addr| match addr {
                    IpNetwork::V4(addr) if !addr.ip().is_loopback() => {
                        Some((
                            iface.flags.contains(InterfaceFlags::LOOPBACK),
                            addr.ip(),
                        ))
                    }
                    _ => None,
                })
            })
            .max()
            .map(|(_, addr)| addr);

        if router_id != self.router_id {
            self.router_id = router_id;
            Debug::RouterIdUpdate(router_id).log();
            self.server.notify_all(RepRxMsg::RouterIdUpd(
                RepRouterIdInfo::new(router_id),
            ));
        }
    }
}

// ===== helper functions =====

fn iface_to_info(iface: &interface::Interface) -> RepIfaceInfo {
    RepIfaceInfo::new(
        iface.name.clone(),
        iface.ifindex,
        iface.mtu,
        iface.flags.contains(InterfaceFlags::OPERATIVE),
        iface.flags.contains(InterfaceFlags::LOOPBACK),
    )
}
