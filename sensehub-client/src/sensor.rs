use std::str::FromStr;

use sysinfo::System;

/// Which local quantity stands in for the sensor pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSource {
    /// Aggregate CPU usage, percent.
    Cpu,
    /// Used physical memory, percent.
    Memory,
}

impl FromStr for SensorSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(SensorSource::Cpu),
            "memory" => Ok(SensorSource::Memory),
            other => Err(format!(
                "unknown sensor source '{other}' (expected 'cpu' or 'memory')"
            )),
        }
    }
}

#[derive(Debug)]
pub struct SensorQuerent {
    system: System,
    source: SensorSource,
}

impl SensorQuerent {
    pub fn new(source: SensorSource) -> Self {
        let mut system = System::new_all();
        // Prime the counters; the very first CPU refresh always reads zero.
        system.refresh_cpu_all();
        Self { system, source }
    }

    pub fn read(&mut self) -> f64 {
        match self.source {
            SensorSource::Cpu => self.read_cpu(),
            SensorSource::Memory => self.read_memory(),
        }
    }

    fn read_cpu(&mut self) -> f64 {
        self.system.refresh_cpu_all();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        let total: f32 = cpus.iter().map(|cpu| cpu.cpu_usage()).sum();
        (total / cpus.len() as f32) as f64
    }

    fn read_memory(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_cpu() {
        let mut querent = SensorQuerent::new(SensorSource::Cpu);
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let value = querent.read();

        println!("{:?}", value);
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_read_memory() {
        let mut querent = SensorQuerent::new(SensorSource::Memory);
        let value = querent.read();

        println!("{:?}", value);
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_source_from_str() {
        assert_eq!("cpu".parse::<SensorSource>(), Ok(SensorSource::Cpu));
        assert_eq!("memory".parse::<SensorSource>(), Ok(SensorSource::Memory));
        assert!("dht11".parse::<SensorSource>().is_err());
    }
}
