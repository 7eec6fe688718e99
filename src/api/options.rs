use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for a raft node. Anything left `None` takes its default.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub heartbeat_interval: Option<Duration>,
    pub election_timeout_min: Option<Duration>,
    pub election_timeout_max: Option<Duration>,
    pub election_check_interval: Option<Duration>,
    pub replication_interval: Option<Duration>,
    pub apply_interval: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    pub rpc_worker_pool_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub(super) struct RaftOptionsValidated {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub election_check_interval: Duration,
    pub replication_interval: Duration,
    pub apply_interval: Duration,
    pub rpc_timeout: Duration,
    pub rpc_worker_pool_size: usize,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err("Election minimum timeout must be greater than leader's heartbeat");
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err("Election minimum timeout must be less than maximum timeout");
        }
        if self.rpc_timeout >= self.election_timeout_min {
            return Err("RPC timeout must be less than the election minimum timeout");
        }
        if self.rpc_worker_pool_size == 0 {
            return Err("RPC worker pool must have at least one worker");
        }
        let intervals = [
            self.heartbeat_interval,
            self.election_check_interval,
            self.replication_interval,
            self.apply_interval,
        ];
        if intervals.iter().any(Duration::is_zero) {
            return Err("Tick intervals must be non-zero");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(100)),
            election_timeout_min: options.election_timeout_min.unwrap_or(Duration::from_millis(300)),
            election_timeout_max: options.election_timeout_max.unwrap_or(Duration::from_millis(600)),
            election_check_interval: options.election_check_interval.unwrap_or(Duration::from_millis(20)),
            replication_interval: options.replication_interval.unwrap_or(Duration::from_millis(30)),
            apply_interval: options.apply_interval.unwrap_or(Duration::from_millis(10)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_millis(150)),
            rpc_worker_pool_size: options.rpc_worker_pool_size.unwrap_or(32),
        };

        values.validate()?;
        Ok(values)
    }
}
