//! Side selection.
//!
//! The track has two symmetric lane groups. Each board streams one of them, and
//! each car belongs to one of them. Both assignments live in the shared registry
//! table (`ip_addresses` by default):
//!
//! | row key          | `cf:side` |
//! |------------------|-----------|
//! | board IPv4 addr  | `0` / `1` |
//! | `tag#{tag id}`   | `0` / `1` |
//!
//! A board the registry has never seen registers itself with the configured
//! default side on start-up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{DashError, DashResult};
use crate::hardware::capabilities::TagId;
use crate::store::{Cell, RowStore};

/// Registry column holding a side index
pub const SIDE_COLUMN: &str = "side";

/// One of the two lane groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Side(u8);

impl Side {
    /// Left lane group
    pub const LEFT: Side = Side(0);
    /// Right lane group
    pub const RIGHT: Side = Side(1);

    /// Index stored in the registry (0 or 1)
    pub fn index(self) -> u8 {
        self.0
    }

    /// Track number used in row keys (1 or 2)
    pub fn track_number(self) -> u8 {
        self.0 + 1
    }

    /// The opposite side
    pub fn other(self) -> Side {
        if self == Side::LEFT {
            Side::RIGHT
        } else {
            Side::LEFT
        }
    }

    /// Dashboard column for the car streamed on this side
    pub fn car_column(self) -> &'static str {
        if self == Side::LEFT {
            "car1"
        } else {
            "car2"
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Side::LEFT),
            1 => Ok(Side::RIGHT),
            other => Err(format!("side must be 0 or 1, got {}", other)),
        }
    }
}

impl From<Side> for u8 {
    fn from(side: Side) -> u8 {
        side.0
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_side(key: &str, raw: &str) -> DashResult<Side> {
    raw.trim()
        .parse::<u8>()
        .map_err(|e| e.to_string())
        .and_then(Side::try_from)
        .map_err(|message| DashError::Registry {
            key: key.to_string(),
            message,
        })
}

/// Registry row key for a tag
pub fn tag_key(tag: TagId) -> String {
    format!("tag#{}", tag)
}

/// Address of the interface that routes to the internet.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a route.
pub fn local_address() -> DashResult<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(addr) => Err(DashError::Configuration(format!(
            "board address {} is not IPv4; set board.address",
            addr
        ))),
    }
}

/// Resolves board and car sides against the registry.
pub struct SideSelector<S> {
    store: Arc<S>,
    table: String,
    address: Ipv4Addr,
    tag_sides: HashMap<TagId, Side>,
}

impl<S: RowStore> SideSelector<S> {
    /// Look this board up, registering `default_side` if it is new
    pub async fn connect(
        store: Arc<S>,
        table: impl Into<String>,
        address: Ipv4Addr,
        default_side: Side,
    ) -> DashResult<Self> {
        let selector = Self {
            store,
            table: table.into(),
            address,
            tag_sides: HashMap::new(),
        };

        let key = address.to_string();
        let existing = selector.store.read_row(&selector.table, &key).await?;
        if existing.as_ref().and_then(|r| r.get(SIDE_COLUMN)).is_none() {
            selector
                .store
                .mutate_row(
                    &selector.table,
                    &key,
                    &[Cell::new(SIDE_COLUMN, default_side.to_string())],
                )
                .await?;
            info!(%address, side = %default_side, "registered board");
        }

        Ok(selector)
    }

    /// This board's assigned side, re-read from the registry
    pub async fn get_side(&self) -> DashResult<Side> {
        let key = self.address.to_string();
        let row = self.store.read_row(&self.table, &key).await?;
        match row.as_ref().and_then(|r| r.get(SIDE_COLUMN)) {
            Some(raw) => parse_side(&key, raw),
            None => Err(DashError::Registry {
                key,
                message: "board is not registered".to_string(),
            }),
        }
    }

    /// Side a car is registered to, if any
    ///
    /// Only hits are cached; an unregistered tag is looked up again on its next scan.
    pub async fn side_of(&mut self, tag: TagId) -> DashResult<Option<Side>> {
        if let Some(side) = self.tag_sides.get(&tag) {
            return Ok(Some(*side));
        }

        let key = tag_key(tag);
        let side = match self.store.read_row(&self.table, &key).await? {
            Some(row) => match row.get(SIDE_COLUMN) {
                Some(raw) => Some(parse_side(&key, raw)?),
                None => None,
            },
            None => None,
        };
        debug!(%tag, ?side, "resolved tag side");
        if let Some(side) = side {
            self.tag_sides.insert(tag, side);
        }
        Ok(side)
    }

    /// True when `tag` belongs to the side opposite `current`
    ///
    /// Unregistered tags never count as the other side.
    pub async fn is_side(&mut self, tag: TagId, current: Side) -> DashResult<bool> {
        Ok(matches!(self.side_of(tag).await?, Some(side) if side != current))
    }

    /// The registry key of this board
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }
}
