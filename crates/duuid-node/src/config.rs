use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use duuid::{
    AllocatorBackend, ConsumerWait, GeneratorConfig, GeneratorMode, IdentityInfo, NaiveDate, params,
};

/// Runtime configuration for the `duuid-node` binary.
///
/// Every option can also be set through the environment variable named next
/// to it, or a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "duuid-node",
    version,
    about = "Allocates a worker id and emits or decodes cluster-unique 64-bit IDs"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Name this node registers under with the allocator backend.
    ///
    /// Environment variable: `DUUID_NODE_NAME`
    #[arg(long, env = "DUUID_NODE_NAME", default_value_t = String::from("duuid-node"), global = true)]
    pub node_name: String,

    /// Width of the worker id field.
    ///
    /// Environment variable: `DUUID_WORKER_ID_BITS`
    #[arg(long, env = "DUUID_WORKER_ID_BITS", default_value_t = 23, global = true)]
    pub worker_id_bits: u8,

    /// Width of the day offset field.
    ///
    /// Environment variable: `DUUID_DAY_BITS`
    #[arg(long, env = "DUUID_DAY_BITS", default_value_t = 15, global = true)]
    pub day_bits: u8,

    /// Width of the sequence field. The three widths must sum to 63.
    ///
    /// Environment variable: `DUUID_SEQUENCE_BITS`
    #[arg(long, env = "DUUID_SEQUENCE_BITS", default_value_t = 25, global = true)]
    pub sequence_bits: u8,

    /// Date of day offset 0, as `YYYY-MM-DD` (UTC).
    ///
    /// Environment variable: `DUUID_EPOCH`
    #[arg(long, env = "DUUID_EPOCH", default_value = "2025-01-01", global = true)]
    pub epoch: NaiveDate,

    /// Buffered mode runs a background producer; synchronous mode does not.
    ///
    /// Environment variable: `DUUID_MODE`
    #[arg(long, env = "DUUID_MODE", value_enum, default_value_t = ModeArg::Buffered, global = true)]
    pub mode: ModeArg,

    /// Ring buffer slots, a power of two.
    ///
    /// Environment variable: `DUUID_RING_BUFFER_CAPACITY`
    #[arg(long, env = "DUUID_RING_BUFFER_CAPACITY", default_value_t = 1 << 16, global = true)]
    pub ring_buffer_capacity: usize,

    /// Occupancy ratio in (0, 1] at which the producer pauses.
    ///
    /// Environment variable: `DUUID_FILL_FACTOR`
    #[arg(long, env = "DUUID_FILL_FACTOR", default_value_t = 0.5, global = true)]
    pub fill_factor: f64,

    /// Start each day at a random sequence below `--random-start-ceiling`.
    ///
    /// Environment variable: `DUUID_RANDOMIZE_SEQUENCE_START`
    #[arg(long, env = "DUUID_RANDOMIZE_SEQUENCE_START", default_value_t = false, global = true)]
    pub randomize_sequence_start: bool,

    /// Environment variable: `DUUID_RANDOM_START_CEILING`
    #[arg(long, env = "DUUID_RANDOM_START_CEILING", default_value_t = 1024, global = true)]
    pub random_start_ceiling: u64,

    /// What a caller does while the ring buffer is empty.
    ///
    /// Environment variable: `DUUID_CONSUMER_WAIT`
    #[arg(long, env = "DUUID_CONSUMER_WAIT", value_enum, default_value_t = ConsumerWaitArg::Backoff, global = true)]
    pub consumer_wait: ConsumerWaitArg,

    /// How often a generator out of sequence numbers re-reads the clock.
    ///
    /// Environment variable: `DUUID_EXHAUSTION_POLL_MS`
    #[arg(long, env = "DUUID_EXHAUSTION_POLL_MS", default_value_t = 10, global = true)]
    pub exhaustion_poll_ms: u64,

    /// Worker id backend: `static`, `lease-store` or `relational`.
    ///
    /// Environment variable: `DUUID_ALLOCATOR`
    #[arg(long, env = "DUUID_ALLOCATOR", default_value = "static", global = true)]
    pub allocator: AllocatorBackend,

    /// Upper bound on the worker id allocation round trip.
    ///
    /// Environment variable: `DUUID_ALLOCATION_TIMEOUT_MS`
    #[arg(long, env = "DUUID_ALLOCATION_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub allocation_timeout_ms: u64,

    /// Worker id used by the static allocator.
    ///
    /// Environment variable: `DUUID_STATIC_WORKER_ID`
    #[arg(long, env = "DUUID_STATIC_WORKER_ID", global = true)]
    pub static_worker_id: Option<u64>,

    /// Comma-separated lease-store endpoints.
    ///
    /// Environment variable: `DUUID_ENDPOINTS`
    #[arg(long, env = "DUUID_ENDPOINTS", global = true)]
    pub endpoints: Option<String>,

    /// Environment variable: `DUUID_USERNAME`
    #[arg(long, env = "DUUID_USERNAME", global = true)]
    pub username: Option<String>,

    /// Environment variable: `DUUID_PASSWORD`
    #[arg(long, env = "DUUID_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// CA certificate (path or inline PEM) for https endpoints.
    ///
    /// Environment variable: `DUUID_CA_CERT`
    #[arg(long, env = "DUUID_CA_CERT", global = true)]
    pub ca_cert: Option<String>,

    /// Environment variable: `DUUID_CLIENT_CERT`
    #[arg(long, env = "DUUID_CLIENT_CERT", global = true)]
    pub client_cert: Option<String>,

    /// Environment variable: `DUUID_CLIENT_KEY`
    #[arg(long, env = "DUUID_CLIENT_KEY", hide_env_values = true, global = true)]
    pub client_key: Option<String>,

    /// Connection URL of the relational backend.
    ///
    /// Environment variable: `DUUID_DATABASE_URL`
    #[arg(long, env = "DUUID_DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Allocate a worker id and print IDs to stdout, one per line.
    Generate {
        /// How many IDs to print.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,

        /// Zero-pad every ID to 20 digits so they sort as strings.
        #[arg(long, default_value_t = false)]
        padded: bool,
    },
    /// Split IDs into worker id, day offset and sequence.
    Decode {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Buffered,
    Synchronous,
}

impl From<ModeArg> for GeneratorMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Buffered => Self::Buffered,
            ModeArg::Synchronous => Self::Synchronous,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerWaitArg {
    Spin,
    Backoff,
}

impl From<ConsumerWaitArg> for ConsumerWait {
    fn from(wait: ConsumerWaitArg) -> Self {
        match wait {
            ConsumerWaitArg::Spin => Self::Spin,
            ConsumerWaitArg::Backoff => Self::Backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub command: Command,
    pub generator: GeneratorConfig,
    pub identity: IdentityInfo,
}

impl TryFrom<CliArgs> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let generator = GeneratorConfig {
            worker_id_bits: args.worker_id_bits,
            day_bits: args.day_bits,
            sequence_bits: args.sequence_bits,
            epoch: args.epoch,
            mode: args.mode.into(),
            ring_buffer_capacity: args.ring_buffer_capacity,
            fill_factor: args.fill_factor,
            randomize_sequence_start: args.randomize_sequence_start,
            random_start_ceiling: args.random_start_ceiling,
            consumer_wait: args.consumer_wait.into(),
            exhaustion_poll_ms: args.exhaustion_poll_ms,
            allocator_backend: args.allocator,
            allocation_timeout_ms: args.allocation_timeout_ms,
        };
        generator.validate()?;

        if args.node_name.trim().is_empty() {
            bail!("DUUID_NODE_NAME must not be empty");
        }

        if let Command::Generate { count, .. } = &args.command {
            if *count == 0 {
                bail!("--count must be greater than 0");
            }
            if args.allocator == AllocatorBackend::Static && args.static_worker_id.is_none() {
                bail!("DUUID_STATIC_WORKER_ID is required with the static allocator");
            }
        }

        let mut identity = IdentityInfo::new(args.node_name);
        let bag = [
            (params::WORKER_ID, args.static_worker_id.map(|id| id.to_string())),
            (params::ENDPOINTS, args.endpoints),
            (params::USERNAME, args.username),
            (params::PASSWORD, args.password),
            (params::CA_CERT, args.ca_cert),
            (params::CLIENT_CERT, args.client_cert),
            (params::CLIENT_KEY, args.client_key),
            (params::URL, args.database_url),
        ];
        for (key, value) in bag {
            if let Some(value) = value {
                identity.insert(key, value);
            }
        }

        Ok(Self {
            command: args.command,
            generator,
            identity,
        })
    }
}
