// Hard caps that keep a single tenant from exhausting memory or the WAL.

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_LABORATORIES_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_LABORATORY: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CODE_LEN: usize = 32;
pub const MAX_USER_LEN: usize = 128;
