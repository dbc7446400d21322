use anyhow::Context;
use bmm_autograd::{OperatorEdgeNames, derive, grad_name};
use bmm_core::{Argument, Shape};
use bmm_ops::{BATCH_MATMUL, OperandFlags, infer_batch_matmul};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bmm")]
#[command(about = "BatchMatMul shape inference and gradient synthesis")]
struct Args {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(ClapArgs)]
struct FlagArgs {
    /// Transpose the last two dimensions of A.
    #[arg(long)]
    trans_a: bool,

    /// Transpose the last two dimensions of B.
    #[arg(long)]
    trans_b: bool,

    /// numpy.matmul-style broadcasting.
    #[arg(long)]
    broadcast: bool,
}

impl From<&FlagArgs> for OperandFlags {
    fn from(f: &FlagArgs) -> Self {
        OperandFlags::new(f.trans_a, f.trans_b, f.broadcast)
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Infer the output shape of A x B.
    Infer {
        /// Shape of A, comma separated (e.g. 3,4,5).
        #[arg(long, value_parser = parse_shape)]
        a: Shape,

        /// Shape of B, comma separated.
        #[arg(long, value_parser = parse_shape)]
        b: Shape,

        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Print the two gradient ops of a BatchMatMul node as JSON.
    Grad {
        /// Edge name of input A.
        #[arg(long, default_value = "A")]
        a: String,

        /// Edge name of input B.
        #[arg(long, default_value = "B")]
        b: String,

        /// Edge name of output Y.
        #[arg(long, default_value = "Y")]
        y: String,

        /// Value of the forward node's use_scratch argument.
        #[arg(long)]
        use_scratch: Option<i64>,

        #[command(flatten)]
        flags: FlagArgs,
    },

    /// Print the BatchMatMul operator schema.
    Schema,
}

fn parse_shape(s: &str) -> Result<Shape, String> {
    s.split(',')
        .map(|d| {
            let d = d.trim();
            match d.parse::<i64>() {
                Ok(v) if v >= 0 => Ok(v),
                _ => Err(format!("invalid dimension `{d}`")),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Shape::new)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        Cmd::Infer { a, b, flags } => {
            let flags = OperandFlags::from(&flags);
            let out = infer_batch_matmul(&a, &b, flags)
                .with_context(|| format!("inferring {a} x {b} ({flags})"))?;
            println!("{out}");
        }
        Cmd::Grad {
            a,
            b,
            y,
            use_scratch,
            flags,
        } => {
            let flags = OperandFlags::from(&flags);
            let edges = OperatorEdgeNames::new(
                a.as_str(),
                b.as_str(),
                y.as_str(),
                grad_name(&y),
                grad_name(&a),
                grad_name(&b),
            );
            let scratch = use_scratch.map(Argument::Int);
            let (grad_a, grad_b) = derive(flags, &edges, scratch.as_ref())
                .with_context(|| format!("deriving gradient ({flags})"))?;
            println!("{}", serde_json::to_string_pretty(&[grad_a, grad_b])?);
        }
        Cmd::Schema => print!("{BATCH_MATMUL}"),
    }
    Ok(())
}
