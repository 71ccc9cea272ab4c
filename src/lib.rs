//! # Ruleflow Rules Engine
//!
//! A real-time rules engine for sensor telemetry. An ahead-of-time compiler
//! turns a declarative YAML rule document into a layered execution plan; the
//! runtime engine evaluates that plan on a fixed cadence against a
//! Redis-compatible store, with sentinel-driven active/standby management
//! so at most one engine per cluster drives cycles.
//!
//! ## Pipeline Architecture
//!
//! ### Compile time
//! ```text
//! rules.yaml
//!     ↓
//! [Parser]              → typed rule AST (schema-strict)
//!     ↓
//! [Validator]           → aggregated errors + warnings
//!     ↓
//! [Dependency Analysis] → producer→consumer graph, cycle check, layers
//!     ↓
//! [Grouping]            → size-bounded groups, monotonic indices
//!     ↓
//! [Emitter]             → plan.json + manifest.json on disk
//! ```
//!
//! ### Run time
//! ```text
//! Scheduler tick (active engines only)
//!     ↓
//! Store adapter → current-values map
//!     ↓
//! Temporal buffers update (sampling policy)
//!     ↓
//! Layered evaluation (groups sequential, rules parallel)
//!     ↓
//! Action executor → pending map → atomic batch flush
//! ```
//!
//! ## Usage
//!
//! ### Compiling a rule document
//! ```rust,ignore
//! use ruleflow::compiler::{self, CompileOptions};
//!
//! let opts = CompileOptions::default();
//! let output = compiler::compile_to_dir("rules.yaml", "artifact/", &opts)?;
//! println!("{} rules in {} groups", output.plan.rules.len(), output.plan.groups.len());
//! ```
//!
//! ### Running the engine
//! ```rust,ignore
//! use ruleflow::config::Config;
//! use ruleflow::engine::{RuleEngine, Scheduler};
//! use ruleflow::store::RedisStore;
//!
//! let config = Config::load()?;
//! let store = Arc::new(RedisStore::connect(&config.store).await?);
//! let engine = Arc::new(RuleEngine::from_artifact("artifact/", store, 0, window)?);
//! Scheduler::new(engine, &config, cancel).run().await;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Rule AST: conditions, actions, operators |
//! | `parser` | YAML document → AST |
//! | `expr` | Expression tokenizer, parser, interpreter, cache |
//! | `validator` | Aggregated semantic checks, buffer sizing |
//! | `analysis` | Dependency graph, cycle detection, layering, grouping |
//! | `emit` | Executable plan + manifest, artifact I/O |
//! | `compiler` | Compile pipeline orchestration |
//! | `temporal` | Per-sensor ring buffers with sampling policy |
//! | `engine` | Condition evaluators, cycle loop, scheduler, HA |
//! | `store` | Store trait, Redis adapter, in-memory double |
//! | `config` | Figment-based hierarchical configuration |

pub mod analysis;
pub mod ast;
pub mod compiler;
pub mod config;
pub mod emit;
pub mod engine;
pub mod expr;
pub mod parser;
pub mod store;
pub mod temporal;
pub mod validator;

// Re-export the types most callers need.
pub use crate::ast::{
    Action, CompareOp, Condition, ConditionGroup, ConditionNode, Literal, Rule, RuleSet,
};
pub use crate::compiler::{CompileError, CompileOptions, CompileOutput};
pub use crate::config::Config;
pub use crate::emit::{ExecutablePlan, Manifest};
pub use crate::engine::{CycleReport, EngineError, RuleEngine, Scheduler, StatsSnapshot};
pub use crate::store::{MemoryStore, RedisStore, Store, StoreError, WriteValue};
