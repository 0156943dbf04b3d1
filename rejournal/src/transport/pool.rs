use super::*;

use moka::sync::Cache;

/// Connections shared per peer address.
///
/// Connections idle for longer than `idle_timeout` are dropped and a closed
/// connection is replaced on the next lookup.
#[derive(Clone)]
pub struct ConnectionPool {
    cache: Cache<NodeAddress, Connection>,
    options: TransportOptions,
}

impl ConnectionPool {
    pub fn new(options: TransportOptions) -> Self {
        let cache = Cache::builder()
            .time_to_idle(options.idle_timeout)
            .build();
        Self { cache, options }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn get(&self, peer: &NodeAddress) -> Connection {
        if let Some(conn) = self.cache.get(peer) {
            if !conn.is_closed() {
                return conn;
            }
            info!("reconnecting to {peer}");
            self.cache.invalidate(peer);
        }
        self.cache
            .get_with(peer.clone(), || Connection::open(peer.clone(), &self.options))
    }

    /// Sends a typed request to `peer` with the default request timeout.
    pub async fn call<Req: Encode, Resp: Decode>(
        &self,
        peer: &NodeAddress,
        command_type: CommandType,
        req: &Req,
    ) -> Result<Resp, Error> {
        let conn = self.get(peer);
        call(&conn, command_type, req, self.options.rpc_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_connection_is_replaced() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let peer: NodeAddress = format!("http://127.0.0.1:{port}").parse().unwrap();

        let pool = ConnectionPool::new(TransportOptions::default());
        let conn = pool.get(&peer);
        let r: Result<(), Error> = pool.call(&peer, CommandType::LastApplied, &()).await;
        assert!(r.is_err());
        assert!(conn.is_closed());

        let conn2 = pool.get(&peer);
        assert!(!conn.ptr_eq(&conn2));
    }
}
