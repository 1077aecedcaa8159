/*!
xonrequest: an HTTP gateway that runs a configured script or shell command per route.

Architecture
- Binary glue (src/main.rs) parses the CLI, initialises logging, loads rules and starts the server.
- One request flows: http → router → args → redirect → order → invocation → runner → gateway reply.

Key modules
- config: rule records (JSON/YAML) validated into `RouteRule`; bad records are skipped.
- router: route templates with typed variables; 404 vs 405 decisions.
- args: path/query/post argument groups; `key=value` tokens, bare keys for empty values.
- redirect: reserved `<`/`>` parameters turned into stdin/stdout files.
- order: configured group order completed with the `query, path, post` fallback.
- invocation: final argv, shell-mode escaping and the `sudo -u` prefix.
- runner: child in its own process group; merged output as bounded chunks; kill on drop.
- gateway: per-connection pipeline, buffered exit-code replies and streamed output.
- server: non-blocking accept loop, one thread per connection.

Environment
- XONREQUEST_BIND: listen address when `--bind` is not given.
- XONREQUEST_LOG / RUST_LOG: tracing filter directive.
*/

pub mod args;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod http;
pub mod invocation;
pub mod logging;
pub mod order;
pub mod redirect;
pub mod router;
pub mod runner;
pub mod server;
pub mod util;

pub use config::{load_rules, LoadedRules, RouteRule};
pub use errors::{display_for_gateway_error, http_status_for_gateway_error, GatewayError};
pub use gateway::{ExecOutcome, Gateway, RouteHandler};
pub use invocation::{Identity, Invocation, Target};
pub use server::start_gateway;
