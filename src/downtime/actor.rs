use std::time::{Duration, Instant};

use actix::prelude::*;
use chrono::Utc;
use log::{error, info};

use crate::AppData;

use super::controller::mark_offline_sensors;

pub struct DowntimeActor {
    pub app_data: AppData,
}

impl DowntimeActor {
    fn on_tick(&mut self, _ctx: &mut Context<Self>) {
        let start = Instant::now();

        let connection = self.app_data.pool.get();

        let mut connection = match connection {
            Ok(x) => x,
            Err(desc) => {
                error!("Error in connection pool: {}", desc);
                return
            },
        };

        let threshold = self.app_data.config.offline_threshold;
        match mark_offline_sensors(&mut connection, Utc::now().naive_utc(), threshold) {
            Ok(ids) if !ids.is_empty() => info!("{} sensors went offline", ids.len()),
            Ok(_) => {},
            Err(description) => error!("Error during sensor check: {}", description),
        }

        info!("Sensors checked in {}ms", start.elapsed().as_millis());
    }
}

impl Actor for DowntimeActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        info!("starting the downtime actor");

        let interval = Duration::from_secs(self.app_data.config.check_interval_secs);
        ctx.run_interval(interval, Self::on_tick);
    }
}
