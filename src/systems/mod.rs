pub mod occupancy;
pub mod position_remapping;
pub mod ticketing;
pub mod zones;

use log::info;
use occupancy::OccupancyTracker;
use ticketing::TicketingSystem;
use zones::SessionZones;

use crate::monitor_config::MonitorConfig;

pub struct Systems {
    pub zones: SessionZones,
    pub occupancy_tracker: OccupancyTracker,
    pub ticketing_system: TicketingSystem,
}

impl Systems {
    pub fn new(config: &MonitorConfig, zones: SessionZones) -> Systems {
        let ticketing_system = TicketingSystem::new(
            &config.ticket_seed,
            config.binding_trigger,
            config.exhausted_queue_policy,
            config.invalid_ticket,
        );

        info!(
            "Monitoring {} check-in zone(s) and {} slot(s); binding on {:?}, invalid ticket = {}",
            zones.check_ins().len(),
            zones.slots().len(),
            config.binding_trigger,
            config.invalid_ticket
        );

        Systems {
            zones,
            occupancy_tracker: OccupancyTracker::new(),
            ticketing_system,
        }
    }

    /// Back to the state of a freshly started session
    pub fn reset(&mut self) {
        self.ticketing_system.reset();
        self.occupancy_tracker.clear();
    }
}
