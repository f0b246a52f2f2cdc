//! Gateway: webhook orchestration and the HTTP surface.
//!
//! [`ChannelGateway`] turns a webhook delivery into contacts, conversations
//! and messages, offloads media and sends automatic replies. [`server`]
//! exposes it over axum; [`bootstrap`] wires it from configuration.

pub mod bootstrap;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod server;

pub use {
    bootstrap::build_gateway,
    directory::{ConfigDirectory, Integration, Organization, OrganizationDirectory},
    gateway::{ChannelGateway, GatewayServices, WebhookOutcome},
    server::{ApiError, AppState, build_router, serve},
};
