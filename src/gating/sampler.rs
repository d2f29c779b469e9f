//! Пересэмплирование гейтов перед каждым шагом обучения.

use super::table::GateTable;
use crate::training::TrainingHook;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed по умолчанию (2^10).
pub const DEFAULT_SEED: u64 = 1024;

/// Разыгрывает набор гейтов на каждый шаг.
///
/// Одно независимое испытание Бернулли на блок за шаг; решение действует
/// для всего батча этого шага.
pub struct GateSampler {
    rng: StdRng,
}

impl GateSampler {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Открывает все гейты, затем закрывает блок `i`, если равномерная
    /// величина из `[0, 1)` меньше его вероятности отключения. Возвращает
    /// число закрытых блоков.
    pub fn before_step(&mut self, table: &mut GateTable) -> usize {
        table.open_all();
        let handles: Vec<_> = table.handles().collect();
        let mut closed = 0;
        for handle in handles {
            let draw: f32 = self.rng.gen();
            if draw < table.death_rate(handle) {
                table.set_gate(handle, false);
                closed += 1;
            }
        }
        tracing::debug!(closed, blocks = table.len(), "gates sampled");
        closed
    }

    /// Открывает все гейты: валидация идёт по полной сети.
    pub fn after_epoch(&mut self, table: &mut GateTable) {
        table.open_all();
        tracing::debug!(blocks = table.len(), "gates reset to open");
    }
}

impl Default for GateSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl TrainingHook for GateSampler {
    fn on_step_begin(&mut self, gates: &mut GateTable) {
        self.before_step(gates);
    }

    fn on_epoch_end(&mut self, gates: &mut GateTable) {
        self.after_epoch(gates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::table::GateEntry;

    fn table_with_rates(rates: &[f32]) -> GateTable {
        let mut table = GateTable::new();
        for &death_rate in rates {
            table.append(GateEntry { death_rate, gate: true });
        }
        table
    }

    #[test]
    fn closure_frequency_matches_death_rate() {
        let mut table = table_with_rates(&[0.3]);
        let mut sampler = GateSampler::new(7);
        let closed: usize = (0..10_000).map(|_| sampler.before_step(&mut table)).sum();
        // Binomial(10000, 0.3): среднее 3000, sd ~46.
        assert!((2800..=3200).contains(&closed), "closed {} times", closed);
    }

    #[test]
    fn zero_rate_never_closes() {
        let mut table = table_with_rates(&[0.0, 0.0, 0.0]);
        let mut sampler = GateSampler::default();
        for _ in 0..1000 {
            assert_eq!(sampler.before_step(&mut table), 0);
        }
        assert_eq!(table.open_count(), 3);
    }

    #[test]
    fn after_epoch_opens_all() {
        let mut table = table_with_rates(&[0.99, 0.99, 0.99, 0.99]);
        let mut sampler = GateSampler::new(1);
        sampler.before_step(&mut table);
        assert!(table.open_count() < 4);

        sampler.after_epoch(&mut table);
        assert_eq!(table.open_count(), 4);
    }

    #[test]
    fn same_seed_same_pattern() {
        let rates = [0.5; 16];
        let (mut a, mut b) = (table_with_rates(&rates), table_with_rates(&rates));
        let (mut sa, mut sb) = (GateSampler::new(1024), GateSampler::new(1024));
        for _ in 0..5 {
            sa.before_step(&mut a);
            sb.before_step(&mut b);
            assert_eq!(a.entries(), b.entries());
        }
    }

    #[test]
    fn hook_methods_delegate() {
        let mut table = table_with_rates(&[0.99; 8]);
        let mut hook: Box<dyn TrainingHook> = Box::new(GateSampler::new(3));
        hook.on_step_begin(&mut table);
        assert!(table.closed_count() > 0);
        hook.on_epoch_end(&mut table);
        assert_eq!(table.closed_count(), 0);
    }
}
