use camino::Utf8PathBuf;
use clap::Args;
use hac::crypto::DefaultCryptoBackend;
use hac::formats::ncz::decompress_ncz;
use hac::sink::VecSink;
use std::error::Error;

#[derive(Args, Debug)]
pub struct Opts {
    /// Path to the source `.ncz` file.
    input: Utf8PathBuf,

    /// Path to write the reconstructed `.nca` to. Defaults to the input
    /// path with its extension replaced.
    #[clap(long)]
    out: Option<Utf8PathBuf>,
}

pub fn main(opts: Opts) -> Result<(), Box<dyn Error>> {
    let source = std::fs::read(&opts.input)?;

    let mut sink = VecSink::default();
    let result = decompress_ncz(&source, &mut sink, &DefaultCryptoBackend)?;

    let out = opts.out.clone().unwrap_or_else(|| opts.input.with_extension("nca"));
    std::fs::write(&out, &sink.0)?;

    tracing::info!(
        nca_size = result.nca_size,
        sections = result.sections.len(),
        block_mode = result.block_header.is_some(),
        path = %out,
        "decompressed NCZ",
    );

    Ok(())
}
