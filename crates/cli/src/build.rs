use camino::Utf8PathBuf;
use clap::Args;
use hac::build_nsp::{build_nsp, BuildNspOptions, KeysInput};
use hac::formats::romfs::RomFsEntry;
use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

#[derive(Args, Debug)]
pub struct Opts {
    /// Path to a `prod.keys`-style text keyfile.
    #[clap(long)]
    keys: Utf8PathBuf,

    /// Directory holding the ExeFS contents (main, main.npdm, ...).
    #[clap(long)]
    exefs: Utf8PathBuf,

    /// Directory holding the control archive contents (control.nacp, icon).
    #[clap(long)]
    control: Utf8PathBuf,

    /// Directory tree to embed as the Program NCA's RomFS section.
    #[clap(long)]
    romfs: Option<Utf8PathBuf>,

    /// Directory holding the Logo section's flat file set.
    #[clap(long)]
    logo: Option<Utf8PathBuf>,

    /// Directory tree to embed as the HtmlDoc manual NCA's RomFS.
    #[clap(long)]
    htmldoc: Option<Utf8PathBuf>,

    /// Directory tree to embed as the LegalInformation manual NCA's RomFS.
    #[clap(long)]
    legalinfo: Option<Utf8PathBuf>,

    /// Overrides the title ID extracted from `main.npdm`.
    #[clap(long)]
    title_id: Option<String>,

    #[clap(long, default_value_t = 1)]
    key_generation: u8,

    #[clap(long)]
    title_name: Option<String>,

    #[clap(long)]
    title_publisher: Option<String>,

    #[clap(long, default_value_t = false)]
    plaintext: bool,

    #[clap(long, default_value_t = false)]
    no_logo: bool,

    #[clap(long, default_value_t = false)]
    no_patch_nacp_logo: bool,

    #[clap(long, default_value_t = false)]
    no_patch_acid_key: bool,

    #[clap(long, default_value_t = false)]
    no_sign_nca_sig2: bool,

    /// Where to write the resulting NSP. Defaults to `<cwd>/<filename>`.
    #[clap(long)]
    out: Option<Utf8PathBuf>,
}

fn read_flat_dir(path: &Path) -> Result<HashMap<String, Vec<u8>>, Box<dyn Error>> {
    let mut map = HashMap::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            map.insert(name, std::fs::read(entry.path())?);
        }
    }
    Ok(map)
}

fn read_romfs_tree(path: &Path) -> Result<RomFsEntry, Box<dyn Error>> {
    let mut root = RomFsEntry::empty_directory();
    for entry in walkdir::WalkDir::new(path).into_iter() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path)?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        root.insert_file(&relative, std::fs::read(entry.path())?);
    }
    Ok(root)
}

pub fn main(opts: Opts) -> Result<(), Box<dyn Error>> {
    let keys_text = std::fs::read_to_string(&opts.keys)?;
    let exefs = read_flat_dir(opts.exefs.as_std_path())?;
    let control = read_flat_dir(opts.control.as_std_path())?;

    let mut build_opts = BuildNspOptions::new(KeysInput::Text(keys_text), exefs, control);

    if let Some(romfs) = &opts.romfs {
        build_opts.romfs = Some(read_romfs_tree(romfs.as_std_path())?);
    }
    if let Some(logo) = &opts.logo {
        build_opts.logo = Some(read_flat_dir(logo.as_std_path())?);
    }
    if let Some(htmldoc) = &opts.htmldoc {
        build_opts.htmldoc = Some(read_romfs_tree(htmldoc.as_std_path())?);
    }
    if let Some(legalinfo) = &opts.legalinfo {
        build_opts.legalinfo = Some(read_romfs_tree(legalinfo.as_std_path())?);
    }

    if let Some(title_id) = &opts.title_id {
        let title_id = title_id.trim_start_matches("0x");
        build_opts.title_id = Some(u64::from_str_radix(title_id, 16)?);
    }
    build_opts.key_generation = opts.key_generation;
    build_opts.title_name = opts.title_name.clone();
    build_opts.title_publisher = opts.title_publisher.clone();
    build_opts.plaintext = opts.plaintext;
    build_opts.no_logo = opts.no_logo;
    build_opts.no_patch_nacp_logo = opts.no_patch_nacp_logo;
    build_opts.no_patch_acid_key = opts.no_patch_acid_key;
    build_opts.no_sign_nca_sig2 = opts.no_sign_nca_sig2;

    let result = build_nsp(build_opts)?;

    let out = opts.out.clone().unwrap_or_else(|| Utf8PathBuf::from(&result.filename));
    std::fs::write(&out, &result.nsp)?;

    tracing::info!(
        title_id = %result.title_id,
        nca_count = result.nca_ids.len(),
        path = %out,
        "wrote NSP",
    );

    Ok(())
}
