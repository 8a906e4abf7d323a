// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use bootimage::{ImageDescriptor, ImageRole, OutputImage, PlatformLayout};

mod images;
mod output;
mod report;

use images::ImageArg;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "combines a bootloader and application images into one \
             flashable image with a metadata block"
)]
struct Args {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Computes metadata for every image and writes the combined output.
    Build {
        /// Bootloader binary.
        #[clap(long)]
        bootloader: PathBuf,
        /// File holding the raw MAC key.
        #[clap(long)]
        key_file: PathBuf,
        /// Name of the platform configuration.
        #[clap(long)]
        config: String,
        /// Directory holding platform configurations.
        #[clap(long, default_value = "config")]
        config_dir: PathBuf,
        #[clap(long, default_value = "firmware.bin")]
        out: PathBuf,
        #[clap(long, arg_enum, default_value = "bin")]
        format: OutputFormat,
        /// Application images, as PATH (placed in slots in the order the
        /// configuration lists them) or SLOT=PATH.
        #[clap(required = true)]
        images: Vec<ImageArg>,
    },

    /// Generates a configuration for every platform description in a
    /// directory.
    GenConfig {
        description_dir: PathBuf,
        config_dir: PathBuf,
    },

    /// Prints the memory map of a configuration.
    ShowLayout {
        #[clap(long)]
        config: String,
        #[clap(long, default_value = "config")]
        config_dir: PathBuf,
    },

    /// Checks a previously built binary image against its metadata block.
    Inspect {
        #[clap(long)]
        config: String,
        #[clap(long, default_value = "config")]
        config_dir: PathBuf,
        /// Also check authentication tags with this key.
        #[clap(long)]
        key_file: Option<PathBuf>,
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info"),
    )
    .format_timestamp(None)
    .init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Build {
            bootloader,
            key_file,
            config,
            config_dir,
            out,
            format,
            images,
        } => {
            let layout = PlatformLayout::load(&config_dir, &config)?;
            let key = bootimage::read_key(&key_file)?;
            build(&layout, &bootloader, &images, &key, &out, format)?;
        }
        Cmd::GenConfig {
            description_dir,
            config_dir,
        } => gen_config(&description_dir, &config_dir)?,
        Cmd::ShowLayout { config, config_dir } => {
            let layout = PlatformLayout::load(&config_dir, &config)?;
            print!("{}", report::layout_table(&layout));
        }
        Cmd::Inspect {
            config,
            config_dir,
            key_file,
            image,
        } => {
            let layout = PlatformLayout::load(&config_dir, &config)?;
            let key = key_file
                .as_deref()
                .map(bootimage::read_key)
                .transpose()?;
            inspect(&layout, &image, key.as_deref())?;
        }
    }
    Ok(())
}

/// Builds and writes the output image. Nothing is written unless every input
/// is read and composed successfully.
fn build(
    layout: &PlatformLayout,
    bootloader: &Path,
    image_args: &[ImageArg],
    key: &[u8],
    out: &Path,
    format: OutputFormat,
) -> Result<()> {
    let bootloader =
        ImageDescriptor::from_file(ImageRole::Bootloader, bootloader)?;
    let applications = images::resolve(layout, image_args)?
        .into_iter()
        .map(|(role, path)| ImageDescriptor::from_file(role, &path))
        .collect::<bootimage::Result<Vec<_>>>()?;

    let composed =
        bootimage::build_image(layout, bootloader, applications, key)?;

    output::write(out, format, &composed.output, layout.bootloader().address)
        .with_context(|| format!("writing {}", out.display()))?;
    log::info!("wrote {}", out.display());

    print!("{}", report::summary(&composed));
    Ok(())
}

fn gen_config(description_dir: &Path, config_dir: &Path) -> Result<()> {
    let configs = bootimage::platform::generate_dir(description_dir)?;
    if configs.is_empty() {
        bail!("no platform descriptions in {}", description_dir.display());
    }
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    for (name, text) in &configs {
        let path = config_dir.join(format!("{}.toml", name));
        output::write_atomic(&path, text.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("generated {}", path.display());
    }
    Ok(())
}

fn inspect(
    layout: &PlatformLayout,
    path: &Path,
    key: Option<&[u8]>,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let image = OutputImage::from_bytes(layout.span().start, bytes);
    let (block, checks) = bootimage::verify(layout, &image, key)?;
    print!("{}", report::inspection(&block, &checks, key.is_some()));

    let failed = checks
        .iter()
        .filter(|c| c.verdict != bootimage::Verdict::Ok)
        .count();
    if failed > 0 {
        bail!("{} of {} images failed verification", failed, checks.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const LAYOUT: &str = indoc! {r#"
        name = "cli"
        byte-order = "little"
        word-size = 4
        alignment = 4

        [metadata]
        address = 0x0
        size = 0x100
        max-entries = 2

        [bootloader]
        address = 0x100
        max-size = 0x100

        [[slots]]
        id = 0
        address = 0x200
        max-size = 0x10
    "#};

    fn setup(
        app_len: usize,
    ) -> (tempfile::TempDir, PlatformLayout, Vec<ImageArg>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("boot.bin"), b"bootloader").unwrap();
        std::fs::write(dir.path().join("app.bin"), vec![0x5a; app_len])
            .unwrap();
        let layout = PlatformLayout::parse("cli", LAYOUT).unwrap();
        let images = vec![ImageArg {
            slot: None,
            path: dir.path().join("app.bin"),
        }];
        (dir, layout, images)
    }

    #[test]
    fn build_then_inspect() {
        let (dir, layout, images) = setup(0x10);
        let out = dir.path().join("firmware.bin");
        build(
            &layout,
            &dir.path().join("boot.bin"),
            &images,
            b"key",
            &out,
            OutputFormat::Bin,
        )
        .unwrap();

        assert_eq!(std::fs::metadata(&out).unwrap().len(), 0x210);
        inspect(&layout, &out, Some(&b"key"[..])).unwrap();
        assert!(inspect(&layout, &out, Some(&b"other key"[..])).is_err());
    }

    #[test]
    fn failed_build_writes_nothing() {
        let (dir, layout, images) = setup(0x11);
        let out = dir.path().join("firmware.bin");
        let err = build(
            &layout,
            &dir.path().join("boot.bin"),
            &images,
            b"key",
            &out,
            OutputFormat::Bin,
        )
        .unwrap_err();
        let err = err.downcast::<bootimage::Error>().unwrap();
        assert_eq!(err.kind(), bootimage::ErrorKind::ImageTooLarge);
        assert!(!out.exists());
    }

    #[test]
    fn missing_bootloader() {
        let (dir, layout, images) = setup(1);
        let out = dir.path().join("firmware.bin");
        let err = build(
            &layout,
            &dir.path().join("nope.bin"),
            &images,
            b"key",
            &out,
            OutputFormat::Bin,
        )
        .unwrap_err();
        let err = err.downcast::<bootimage::Error>().unwrap();
        assert_eq!(err.kind(), bootimage::ErrorKind::MissingInputFile);
        assert!(!out.exists());
    }
}
