// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Annotation keys read from user objects
pub mod annotations {
    /// When set to "true" on a Namespace or Service, enables lazy loading
    pub const LAZY_LOADING: &str = "lazyscope.io/lazy-loading";
}

/// Labels written to, or selected from, cluster objects
pub mod labels {
    /// Marks objects written by this controller
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const MANAGED_BY_VALUE: &str = "lazyscope";
    /// Selects the secrets carrying remote cluster credentials
    pub const MULTI_CLUSTER_SECRET: &str = "lazyscope.io/multi-cluster";
}

/// The operator name used as field manager
pub const OPERATOR_NAME: &str = "lazyscope";

/// Naming of the objects this controller writes
pub mod objects {
    /// Prefix of the per-service Sidecar and EnvoyFilter names
    pub const NAME_PREFIX: &str = "lazyscope-";
    /// VirtualService holding the egress gateway routing table
    pub const GATEWAY_ROUTES: &str = "lazyscope-egress-routes";
    /// Gateway the routing table binds to
    pub const EGRESS_GATEWAY: &str = "lazyscope-egressgateway";
    /// Service port of the egress gateway
    pub const EGRESS_GATEWAY_PORT: u16 = 8080;
    /// Header carrying `<host>:<port>` of the real destination
    pub const DESTINATION_HEADER: &str = "x-lazyscope-destination";
    /// Key under which the mesh config is stored in its ConfigMap
    pub const MESH_CONFIG_KEY: &str = "mesh";
}

/// Work queue retry backoff
pub mod queue {
    /// Delay after the first failure, in milliseconds
    pub const BASE_DELAY_MS: u64 = 5;
    /// Maximum delay between retries, in seconds
    pub const MAX_DELAY_SECS: u64 = 1000;
}
