//! Unit tests for compositor services, adapters, and pinned servers.

mod support;
