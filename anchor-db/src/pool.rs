//! Connection pool setup. Grounded on the teacher's `pgsql-store::Client::new`
//! (`r2d2::Pool<ConnectionManager<PgConnection>>` with `test_on_check_out`).

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .test_on_check_out(true)
        .build(manager)
        .map_err(|err| anyhow::anyhow!("failed to build postgres connection pool: {err}"))
}
