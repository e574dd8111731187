mod m0001_ledger;
mod m0002_coordination;
mod m0003_dedup_index;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_ledger::migration());
    reg.register(m0002_coordination::migration());
    reg.register(m0003_dedup_index::migration());
    reg
}
