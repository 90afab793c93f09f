// This file is part of Astarte.
//
// Copyright 2025, 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! The RendezvousInfo type indicates the manner and order in which the Device and Owner find the
//! Rendezvous Server.
//!
//! It is configured during manufacturing (e.g., at an ODM), so the manufacturing entity has the
//! choice of which Rendezvous Server(s) to use and how to access it or them.

use std::borrow::Cow;
use std::fmt::Debug;
use std::net::IpAddr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::utils::OneOrMore;
use crate::v100::{IpAddress, Port};
use crate::Error;

/// ```cddl
/// RendezvousInfo = [
///     + RendezvousDirective
/// ]
/// ```
pub type RendezvousInfo<'a> = OneOrMore<RendezvousDirective<'a>>;

/// ```cddl
/// RendezvousDirective = [
///     + RendezvousInstr
/// ]
/// ```
pub type RendezvousDirective<'a> = OneOrMore<RendezvousInstr<'a>>;

/// ```cddl
/// RendezvousInstr = [
///     RVVariable,
///     RVValue
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RendezvousInstr<'a> {
    /// Identifies the type to decode for [`rv_value`](Self::rv_value)
    pub rv_variable: RvVariable,
    /// Instruction to contact the Rendezvous Server.
    pub rv_value: RvValue<'a>,
}

impl RendezvousInstr<'_> {
    fn encode(rv_variable: RvVariable, value: &impl Serialize) -> Result<RendezvousInstr<'static>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(value, &mut buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the rendezvous value");

            Error::new(ErrorKind::Encode, "the rendezvous value")
        })?;

        Ok(RendezvousInstr {
            rv_variable,
            rv_value: Cow::Owned(buf.into()),
        })
    }

    /// Build the instruction for a DNS name.
    pub fn dns(name: &str) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::Dns, &name)
    }

    /// Build the instruction for an IP address.
    pub fn ip_address(addr: IpAddr) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::IPAddress, &IpAddress::from(addr))
    }

    /// Build the instruction for the port the Device contacts.
    pub fn dev_port(port: Port) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::DevPort, &port)
    }

    /// Build the instruction for the port the Owner contacts.
    pub fn owner_port(port: Port) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::OwnerPort, &port)
    }

    /// Build the instruction for the transport protocol.
    pub fn protocol(value: RvProtocolValue) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::Protocol, &value)
    }

    /// Build the instruction for the delay between retries, in seconds.
    pub fn delay_sec(secs: u32) -> Result<RendezvousInstr<'static>, Error> {
        Self::encode(RvVariable::Delaysec, &secs)
    }

    /// Decode the value of this instruction.
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let bytes: &[u8] = &self.rv_value;

        ciborium::from_reader(bytes).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the rendezvous value");

            Error::new(ErrorKind::Decode, "the rendezvous value")
        })
    }
}

impl Serialize for RendezvousInstr<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_variable,
            rv_value,
        } = self;

        (rv_variable, rv_value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RendezvousInstr<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rv_variable, rv_value) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rv_variable,
            rv_value,
        })
    }
}

/// ```cddl
/// RVVariable = uint8
/// $RVVariable = ()
/// RVVariable /= (
///     RVDevOnly     => 0,
///     RVOwnerOnly   => 1,
///     RVIPAddress   => 2,
///     RVDevPort     => 3,
///     RVOwnerPort   => 4,
///     RVDns         => 5,
///     RVSvCertHash  => 6,
///     RVClCertHash  => 7,
///     RVUserInput   => 8,
///     RVWifiSsid    => 9,
///     RVWifiPw      => 10,
///     RVMedium      => 11,
///     RVProtocol    => 12,
///     RVDelaysec    => 13,
///     RVBypass      => 14,
///     RVExtRV       => 15
/// )
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvVariable {
    /// Device Only
    ///
    /// If the RVDevOnly element appears on the Owner, this instruction is terminated and control proceeds with the next set of instructions.
    DevOnly = 0,
    /// Owner Only
    ///
    /// If the RVOwnerOnly element appears on the Device, this instruction is terminated and control proceeds with the next set of instructions.
    OwnerOnly = 1,
    /// IP address
    IPAddress = 2,
    /// Port, Device
    ///
    /// Based on protocol
    DevPort = 3,
    /// Port, Owner
    ///
    /// Based on protocol
    OwnerPort = 4,
    /// DNS name
    Dns = 5,
    /// TLS Server cert hash
    SvCertHash = 6,
    /// TLS CA cert hash
    ClCertHash = 7,
    /// User input
    UserInput = 8,
    /// SSID
    WifiSsid = 9,
    /// Wireless Password
    WifiPw = 10,
    /// Medium
    Medium = 11,
    /// Protocol
    Protocol = 12,
    /// Delay
    Delaysec = 13,
    /// Bypass
    Bypass = 14,
    /// External RV
    ExtRV = 15,
}

impl Debug for RvVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DevOnly => write!(f, "RVDevOnly(0)"),
            Self::OwnerOnly => write!(f, "RVOwnerOnly(1)"),
            Self::IPAddress => write!(f, "RVIPAddress(2)"),
            Self::DevPort => write!(f, "RVDevPort(3)"),
            Self::OwnerPort => write!(f, "RVOwnerPort(4)"),
            Self::Dns => write!(f, "RVDns(5)"),
            Self::SvCertHash => write!(f, "RVSvCertHash(6)"),
            Self::ClCertHash => write!(f, "RVClCertHash(7)"),
            Self::UserInput => write!(f, "RVUserInput(8)"),
            Self::WifiSsid => write!(f, "RVWifiSsid(9)"),
            Self::WifiPw => write!(f, "RVWifiPw(10)"),
            Self::Medium => write!(f, "RVMedium(11)"),
            Self::Protocol => write!(f, "RVProtocol(12)"),
            Self::Delaysec => write!(f, "RVDelaysec(13)"),
            Self::Bypass => write!(f, "RVBypass(14)"),
            Self::ExtRV => write!(f, "RVExtRV(15)"),
        }
    }
}

impl TryFrom<u8> for RvVariable {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => Self::DevOnly,
            1 => Self::OwnerOnly,
            2 => Self::IPAddress,
            3 => Self::DevPort,
            4 => Self::OwnerPort,
            5 => Self::Dns,
            6 => Self::SvCertHash,
            7 => Self::ClCertHash,
            8 => Self::UserInput,
            9 => Self::WifiSsid,
            10 => Self::WifiPw,
            11 => Self::Medium,
            12 => Self::Protocol,
            13 => Self::Delaysec,
            14 => Self::Bypass,
            15 => Self::ExtRV,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RVVariable")),
        };

        Ok(value)
    }
}

impl From<RvVariable> for u8 {
    fn from(value: RvVariable) -> Self {
        value as u8
    }
}

/// ```cddl
/// RVProtocolValue /= (
///     RVProtRest    => 0,
///     RVProtHttp    => 1,
///     RVProtHttps   => 2,
///     RVProtTcp     => 3,
///     RVProtTls     => 4,
///     RVProtCoapTcp => 5,
///     RVProtCoapUdp => 6
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvProtocolValue {
    /// first supported protocol from:
    ///
    /// - RVProtHttps
    /// - RVProtHttp
    /// - RVProtCoapUdp
    /// - RVProtCoapTcp
    Rest = 0,
    /// HTTP over TCP
    Http = 1,
    /// HTTP over TLS, if supported
    Https = 2,
    /// bare TCP, if supported
    Tcp = 3,
    /// bare TLS, if supported
    Tls = 4,
    /// CoAP protocol over tcp, if supported
    CoapTcp = 5,
    /// CoAP protocol over UDP, if supported
    CoapUdp = 6,
}

impl TryFrom<u8> for RvProtocolValue {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => RvProtocolValue::Rest,
            1 => RvProtocolValue::Http,
            2 => RvProtocolValue::Https,
            3 => RvProtocolValue::Tcp,
            4 => RvProtocolValue::Tls,
            5 => RvProtocolValue::CoapTcp,
            6 => RvProtocolValue::CoapUdp,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RVProtocolValue")),
        };

        Ok(value)
    }
}

impl From<RvProtocolValue> for u8 {
    fn from(value: RvProtocolValue) -> Self {
        value as u8
    }
}

/// ```cddl
/// RVValue = bstr .cbor any
/// ```
pub type RvValue<'a> = Cow<'a, Bytes>;

#[cfg(test)]
pub(crate) mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use crate::utils::Hex;

    use super::*;

    pub(crate) fn create_rv_info() -> RendezvousInfo<'static> {
        let instr = RendezvousInstr::ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();

        RendezvousInfo::new(vec![RendezvousDirective::new(vec![instr]).unwrap()]).unwrap()
    }

    #[test]
    fn rendezvous_info_roundtrip() {
        let case = create_rv_info();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: RendezvousInfo = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);

        insta::assert_snapshot!(Hex::new(&buf), @"8181820245447f000001");
    }

    #[test]
    fn rendezvous_instr_builders() {
        let instr = RendezvousInstr::dns("rv.example.com").unwrap();
        assert_eq!(instr.rv_variable, RvVariable::Dns);
        let name: String = instr.value().unwrap();
        assert_eq!(name, "rv.example.com");

        let instr = RendezvousInstr::ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(instr.rv_variable, RvVariable::IPAddress);
        let ip: IpAddress = instr.value().unwrap();
        assert_eq!(IpAddr::from(ip), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let instr = RendezvousInstr::dev_port(8080).unwrap();
        assert_eq!(instr.rv_variable, RvVariable::DevPort);
        let port: Port = instr.value().unwrap();
        assert_eq!(port, 8080);

        let instr = RendezvousInstr::owner_port(8081).unwrap();
        assert_eq!(instr.rv_variable, RvVariable::OwnerPort);
        let port: Port = instr.value().unwrap();
        assert_eq!(port, 8081);

        let instr = RendezvousInstr::protocol(RvProtocolValue::Tcp).unwrap();
        assert_eq!(instr.rv_variable, RvVariable::Protocol);
        let proto: RvProtocolValue = instr.value().unwrap();
        assert_eq!(proto, RvProtocolValue::Tcp);

        let instr = RendezvousInstr::delay_sec(30).unwrap();
        assert_eq!(instr.rv_variable, RvVariable::Delaysec);
        let delay: u32 = instr.value().unwrap();
        assert_eq!(delay, 30);
    }

    #[test]
    fn rendezvous_instr_value_err() {
        let instr = RendezvousInstr {
            rv_variable: RvVariable::DevPort,
            rv_value: Cow::Owned(vec![0xff].into()),
        };

        let err = instr.value::<Port>().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn rv_variable_roundtrip() {
        let cases = [
            RvVariable::DevOnly,
            RvVariable::OwnerOnly,
            RvVariable::IPAddress,
            RvVariable::DevPort,
            RvVariable::OwnerPort,
            RvVariable::Dns,
            RvVariable::SvCertHash,
            RvVariable::ClCertHash,
            RvVariable::UserInput,
            RvVariable::WifiSsid,
            RvVariable::WifiPw,
            RvVariable::Medium,
            RvVariable::Protocol,
            RvVariable::Delaysec,
            RvVariable::Bypass,
            RvVariable::ExtRV,
        ];

        let encoded = cases
            .map(|case| {
                let mut buf = Vec::new();
                ciborium::into_writer(&case, &mut buf).unwrap();

                let res: RvVariable = ciborium::from_reader(buf.as_slice()).unwrap();

                assert_eq!(res, case);

                Hex::new(&buf).to_string()
            })
            .join("\n");

        insta::assert_snapshot!(encoded, @r"
        00
        01
        02
        03
        04
        05
        06
        07
        08
        09
        0a
        0b
        0c
        0d
        0e
        0f
        ");
    }

    #[test]
    fn rv_variable_err() {
        let err = RvVariable::try_from(16).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn rv_variable_debug() {
        let cases = [
            RvVariable::DevOnly,
            RvVariable::OwnerOnly,
            RvVariable::IPAddress,
            RvVariable::DevPort,
            RvVariable::OwnerPort,
            RvVariable::Dns,
            RvVariable::SvCertHash,
            RvVariable::ClCertHash,
            RvVariable::UserInput,
            RvVariable::WifiSsid,
            RvVariable::WifiPw,
            RvVariable::Medium,
            RvVariable::Protocol,
            RvVariable::Delaysec,
            RvVariable::Bypass,
            RvVariable::ExtRV,
        ]
        .map(|case| format!("{case:?}"))
        .join("\n");

        insta::assert_snapshot!(cases, @r"
        RVDevOnly(0)
        RVOwnerOnly(1)
        RVIPAddress(2)
        RVDevPort(3)
        RVOwnerPort(4)
        RVDns(5)
        RVSvCertHash(6)
        RVClCertHash(7)
        RVUserInput(8)
        RVWifiSsid(9)
        RVWifiPw(10)
        RVMedium(11)
        RVProtocol(12)
        RVDelaysec(13)
        RVBypass(14)
        RVExtRV(15)
        ");
    }

    #[test]
    fn rv_protocol_value_roundtrip() {
        let cases = [
            RvProtocolValue::Rest,
            RvProtocolValue::Http,
            RvProtocolValue::Https,
            RvProtocolValue::Tcp,
            RvProtocolValue::Tls,
            RvProtocolValue::CoapTcp,
            RvProtocolValue::CoapUdp,
        ];

        let encoded = cases
            .map(|case| {
                let mut buf = Vec::new();
                ciborium::into_writer(&case, &mut buf).unwrap();

                let res: RvProtocolValue = ciborium::from_reader(buf.as_slice()).unwrap();

                assert_eq!(res, case);

                Hex::new(&buf).to_string()
            })
            .join("\n");

        insta::assert_snapshot!(encoded, @r"
        00
        01
        02
        03
        04
        05
        06
        ");
    }

    #[test]
    fn rv_protocol_value_err() {
        let err = RvProtocolValue::try_from(7).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }
}
