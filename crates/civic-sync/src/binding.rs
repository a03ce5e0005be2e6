//! Channel descriptor resolution: (type, id) to backing-store binding.

use civic_types::models::{ChannelKey, ChannelType};

use crate::error::ConfigurationError;
use crate::normalize::MessageShape;
use crate::transport::{SubscriptionFilter, TableQuery};

/// Column every backing table is ordered by.
pub const CREATED_AT: &str = "created_at";

/// How a channel reads and appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStrategy {
    /// Named procedures that answer with an [`RpcEnvelope`](civic_types::api::RpcEnvelope).
    Procedure {
        read: &'static str,
        write: &'static str,
    },
    /// Direct filtered select and insert on the backing table.
    FilteredTable,
}

/// Everything the pipeline needs to talk to one channel's store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub channel_type: ChannelType,
    pub channel_id: String,
    pub transport: TransportStrategy,
    pub backing_table: &'static str,
    pub filter_column: &'static str,
    /// Projection for filtered reads, joining author identity.
    pub select: &'static str,
    pub shape: MessageShape,
}

struct Descriptor {
    transport: TransportStrategy,
    backing_table: &'static str,
    filter_column: &'static str,
    select: &'static str,
    shape: MessageShape,
}

fn descriptor(channel_type: ChannelType) -> Descriptor {
    match channel_type {
        ChannelType::ComplaintPublic => Descriptor {
            transport: TransportStrategy::Procedure {
                read: "get_complaint_messages",
                write: "post_complaint_message",
            },
            backing_table: "complaint_messages",
            filter_column: "complaint_id",
            select: "*",
            shape: MessageShape::ComplaintMessage,
        },
        ChannelType::ComplaintInternal => Descriptor {
            transport: TransportStrategy::FilteredTable,
            backing_table: "complaint_internal_notes",
            filter_column: "complaint_id",
            select: "*,staff:profiles!staff_id(full_name,avatar_url,role)",
            shape: MessageShape::InternalNote,
        },
        ChannelType::OfficialNote => Descriptor {
            transport: TransportStrategy::FilteredTable,
            backing_table: "official_notes",
            filter_column: "complaint_id",
            select: "*,author:profiles!author_id(full_name,avatar_url,role)",
            shape: MessageShape::OfficialNote,
        },
        ChannelType::DirectMessage => Descriptor {
            transport: TransportStrategy::FilteredTable,
            backing_table: "direct_messages",
            filter_column: "conversation_id",
            select: "*,sender:profiles!sender_id(full_name,display_name,avatar_url,role)",
            shape: MessageShape::DirectMessage,
        },
    }
}

/// Resolve a channel from its wire names. Fails for anything but the four
/// known types or for a blank id.
pub fn resolve(channel_type: &str, channel_id: &str) -> Result<ChannelBinding, ConfigurationError> {
    let channel_type: ChannelType = channel_type.parse()?;
    resolve_typed(channel_type, channel_id)
}

pub fn resolve_typed(
    channel_type: ChannelType,
    channel_id: &str,
) -> Result<ChannelBinding, ConfigurationError> {
    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(ConfigurationError::EmptyChannelId(channel_type.to_string()));
    }

    let d = descriptor(channel_type);
    Ok(ChannelBinding {
        channel_type,
        channel_id: channel_id.to_string(),
        transport: d.transport,
        backing_table: d.backing_table,
        filter_column: d.filter_column,
        select: d.select,
        shape: d.shape,
    })
}

impl ChannelBinding {
    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            channel_type: self.channel_type,
            channel_id: self.channel_id.clone(),
        }
    }

    pub fn table_query(&self) -> TableQuery {
        TableQuery {
            table: self.backing_table.to_string(),
            select: self.select.to_string(),
            filter_column: self.filter_column.to_string(),
            filter_value: self.channel_id.clone(),
            order_column: CREATED_AT.to_string(),
        }
    }

    pub fn subscription_filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            table: self.backing_table.to_string(),
            column: self.filter_column.to_string(),
            value: self.channel_id.clone(),
        }
    }
}
