//! A transport-agnostic GraphQL client core: request/response types, a
//! pluggable WebSocket subscription transport with swappable protocol
//! dialects (Apollo `graphql-ws`, `graphql-transport-ws`, AWS AppSync
//! realtime), and a single-shot HTTP transport, unified behind one
//! `ClientSession`.
//!
//! # Quick start
//!
//! ```no_run
//! use gql_ws_client::http_transport::HttpTransport;
//! use gql_ws_client::model::GraphQLRequest;
//! use gql_ws_client::session::ClientSession;
//! use gql_ws_client::transport::GqlTransport;
//!
//! #[tokio::main]
//! async fn main() -> gql_ws_client::error::Result<()> {
//!     let transport = HttpTransport::new("https://example.com/graphql");
//!     let session = ClientSession::new(Box::new(transport));
//!     let result = session
//!         .execute(GraphQLRequest::new("query { hello }"))
//!         .await?;
//!     println!("{:?}", result.data);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod appsync;
pub mod error;
pub mod http_transport;
pub mod listener;
pub mod model;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod supervised;
pub mod transport;

pub use adapter::{TlsOptions, TungsteniteAdapter, WebSocketAdapter};
pub use error::{GqlError, Result};
pub use model::{ExecutionResult, GraphQLError, GraphQLRequest};
pub use protocol::{ApolloProtocol, Protocol, TransportWsProtocol};
pub use session::ClientSession;
pub use supervised::SupervisedSession;
pub use transport::{GqlTransport, SubscriptionStream, Transport, TransportBuilder, TransportState};
