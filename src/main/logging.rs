use numabind_core::{Result, err};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::clap::Args;

pub(crate) fn init(args: &Args) -> Result {
	let filter = EnvFilter::try_new(&args.log)
		.map_err(|error| err!("invalid log filter {:?}: {error}", args.log))?;

	let fmt_layer = fmt::Layer::new().with_target(false);
	Registry::default().with(filter).with(fmt_layer).init();
	Ok(())
}
