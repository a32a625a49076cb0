//! HTTP boundary and agent capability layer for pipebridge.
//!
//! - `Connector`: the shared service object (tokens, sessions, bridge, sweeper)
//! - `PipedreamService` + axum routes for the `/pipedream-mcp/*` endpoints
//! - `ToolRegistry` aggregating agent tools from several sources
//! - `PipedreamDiscoveryTool` / `AuthRequiredTool` capability tools

pub mod capability;
pub mod connector;
pub mod pages;
pub mod routes;
pub mod server;
pub mod services;
pub mod tool_registry;

pub use {
    capability::{
        AuthRequiredTool, PipedreamDiscoveryTool, active_servers, register_capability,
    },
    connector::Connector,
    routes::{SharedService, pipedream_router},
    server::{Wiring, build_app, build_service, serve},
    services::{
        LivePipedreamService, NoopPipedreamService, PipedreamService, ServiceError, ServiceResult,
    },
    tool_registry::{
        AgentTool, PipedreamToolDescriptor, ToolInvoker, ToolRegistry, register_app_tools,
        register_descriptors,
    },
};
