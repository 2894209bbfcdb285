use std::fmt;
use std::str::FromStr;

use bitcoin::address::{AddressType, NetworkUnchecked};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::network::BtcNetwork;

/// Locking-script family of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptKind {
    /// Pay-to-public-key-hash.
    Legacy,
    /// P2WPKH wrapped in P2SH.
    P2shSegwit,
    /// Native SegWit v0.
    Bech32,
    /// Native SegWit v1 (taproot).
    Bech32m,
}

impl ScriptKind {
    /// Name Bitcoin Core uses for the `address_type` argument of `getnewaddress`.
    pub fn rpc_name(self) -> &'static str {
        match self {
            ScriptKind::Legacy => "legacy",
            ScriptKind::P2shSegwit => "p2sh-segwit",
            ScriptKind::Bech32 => "bech32",
            ScriptKind::Bech32m => "bech32m",
        }
    }

    /// Whether spends of this kind carry their signature in the witness.
    pub fn is_segwit(self) -> bool {
        !matches!(self, ScriptKind::Legacy)
    }

    fn from_address_type(address_type: AddressType) -> Option<Self> {
        match address_type {
            AddressType::P2pkh => Some(ScriptKind::Legacy),
            AddressType::P2sh => Some(ScriptKind::P2shSegwit),
            AddressType::P2wpkh | AddressType::P2wsh => Some(ScriptKind::Bech32),
            AddressType::P2tr => Some(ScriptKind::Bech32m),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpc_name())
    }
}

impl FromStr for ScriptKind {
    type Err = BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(ScriptKind::Legacy),
            "p2sh-segwit" => Ok(ScriptKind::P2shSegwit),
            "bech32" => Ok(ScriptKind::Bech32),
            "bech32m" => Ok(ScriptKind::Bech32m),
            other => Err(BtcError::InvalidAddress(format!(
                "unknown script kind: {other}"
            ))),
        }
    }
}

/// An address issued by the wallet service, tagged with its script kind.
///
/// The string form is kept opaque: the pipeline never derives scripts from it,
/// it only compares, displays and hands it back to the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    address: String,
    kind: ScriptKind,
}

impl Address {
    /// Wrap an address string without validating it.
    pub fn new(address: impl Into<String>, kind: ScriptKind) -> Self {
        Self {
            address: address.into(),
            kind,
        }
    }

    /// Parse and validate an address for `network`, inferring its script kind.
    pub fn parse(address: &str, network: BtcNetwork) -> Result<Self, BtcError> {
        let parsed = address
            .parse::<bitcoin::Address<NetworkUnchecked>>()
            .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?
            .require_network(network.to_bitcoin_network())
            .map_err(|e| BtcError::InvalidAddress(format!("address not valid on {network}: {e}")))?;

        let kind = parsed
            .address_type()
            .and_then(ScriptKind::from_address_type)
            .ok_or_else(|| {
                BtcError::InvalidAddress(format!("unsupported address type: {address}"))
            })?;

        Ok(Self::new(address, kind))
    }

    /// Parse an address and require that it has the `expected` script kind.
    pub fn parse_as(
        address: &str,
        expected: ScriptKind,
        network: BtcNetwork,
    ) -> Result<Self, BtcError> {
        let parsed = Self::parse(address, network)?;
        if parsed.kind != expected {
            return Err(BtcError::InvalidAddress(format!(
                "expected a {expected} address, got {} ({address})",
                parsed.kind
            )));
        }
        Ok(parsed)
    }

    pub fn as_str(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.address
    }
}
