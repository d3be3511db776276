//! Structural and interprocedural analyses (spec §4.2-§4.4): the CFG/DAG and
//! loop nesting views consumed by local passes, and the call graph,
//! reference graph, init path, object graph and liveness analyses consumed
//! by the global forwarder and allocation inliner.

pub mod call_graph;
pub mod dag;
pub mod init_path;
pub mod live_variables;
pub mod loop_nesting;
pub mod object_graph;
pub mod reference_graph;
