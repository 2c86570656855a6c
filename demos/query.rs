//! Minimal demo: connect to a GraphQL endpoint given as the one CLI
//! argument, read a query from stdin until EOF, print the result as JSON.
//!
//! Not the out-of-scope CLI surface — just enough I/O to exercise a
//! `ClientSession` end to end by hand.

use gql_ws_client::adapter::TungsteniteAdapter;
use gql_ws_client::model::GraphQLRequest;
use gql_ws_client::protocol::TransportWsProtocol;
use gql_ws_client::session::ClientSession;
use gql_ws_client::transport::{GqlTransport, TransportBuilder};
use gql_ws_client::http_transport::HttpTransport;
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let Some(endpoint) = std::env::args().nth(1) else {
        eprintln!("usage: query <ws(s)|http(s)>://endpoint");
        std::process::exit(2);
    };

    let mut query = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut query) {
        eprintln!("failed to read query from stdin: {e}");
        std::process::exit(1);
    }

    let session = match build_session(&endpoint).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("connect failed: {e}");
            std::process::exit(1);
        }
    };

    match session.execute(GraphQLRequest::new(query)).await {
        Ok(result) => println!("{}", serde_json::to_string(&result).unwrap_or_default()),
        Err(e) => {
            eprintln!("query failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn build_session(endpoint: &str) -> gql_ws_client::error::Result<ClientSession> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        let adapter = Arc::new(TungsteniteAdapter::new(endpoint, "graphql-transport-ws"));
        let transport = TransportBuilder::new().build(adapter, Box::new(TransportWsProtocol::new()));
        transport.connect().await?;
        Ok(ClientSession::new(Box::new(transport)))
    } else {
        let transport = HttpTransport::new(endpoint);
        transport.connect().await?;
        Ok(ClientSession::new(Box::new(transport)))
    }
}
