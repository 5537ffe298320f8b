//! Gateway, clients and roles wired together over the in-process broker.
