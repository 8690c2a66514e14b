#![forbid(unsafe_code)]

//! wsdsig CLI: enveloped XML-DSig signing, verification and exclusive C14N.

use clap::{Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;
use std::process;

use wsdsig::c14n::{canonicalize, parse_prefix_list, C14nMode};
use wsdsig::core::{algorithm, Error};
use wsdsig::crypto::SecurityKey;
use wsdsig::dsig::{sign_enveloped, verify_document, DsigContext, Reference, Signature, SignedInfo};
use wsdsig::transforms::ExclusiveC14nTransform;

#[derive(Parser)]
#[command(
    name = "wsdsig",
    about = "Streaming XML-DSig for WS-Security (exclusive C14N, RSA, HMAC)",
    version
)]
struct Cli {
    /// Log engine internals at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the first signature in an XML document
    Verify {
        /// Input XML file
        file: PathBuf,

        /// RSA key in PEM form (the public half is used)
        #[arg(short = 'k', long)]
        key: Option<PathBuf>,

        /// Load raw HMAC key (binary file)
        #[arg(long = "hmac-key")]
        hmac_key: Option<PathBuf>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,

        /// Use the FIPS-approved SHA-256 engine for RSA-SHA256
        #[arg(long)]
        fips: bool,
    },

    /// Sign an XML document with an enveloped signature
    Sign {
        /// Input XML file
        file: PathBuf,

        /// RSA private key in PEM form
        #[arg(short = 'k', long)]
        key: Option<PathBuf>,

        /// Load raw HMAC key (binary file)
        #[arg(long = "hmac-key")]
        hmac_key: Option<PathBuf>,

        /// Signature method URI (default: rsa-sha1, or hmac-sha1 with --hmac-key)
        #[arg(long = "algorithm")]
        method: Option<String>,

        /// Digest method URI for every reference
        #[arg(long, default_value = algorithm::SHA1)]
        digest: String,

        /// Reference URI such as "#body"; repeatable (default: the whole document)
        #[arg(short = 'r', long = "reference")]
        references: Vec<String>,

        /// Register additional ID attribute names
        #[arg(long = "id-attr")]
        id_attr: Vec<String>,

        /// Use the FIPS-approved SHA-256 engine for RSA-SHA256
        #[arg(long)]
        fips: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the exclusive canonical form of an XML document
    C14n {
        /// Input XML file
        file: PathBuf,

        /// Keep comments
        #[arg(long = "with-comments")]
        with_comments: bool,

        /// InclusiveNamespaces prefix list, e.g. "soap #default"
        #[arg(long = "inclusive-prefixes", default_value = "")]
        inclusive_prefixes: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "warn" }),
    )
    .format_timestamp(None)
    .init();

    let result = match cli.command {
        Commands::Verify {
            file,
            key,
            hmac_key,
            id_attr,
            fips,
        } => cmd_verify(file, key, hmac_key, id_attr, fips),

        Commands::Sign {
            file,
            key,
            hmac_key,
            method,
            digest,
            references,
            id_attr,
            fips,
            output,
        } => cmd_sign(SignArgs {
            file,
            key,
            hmac_key,
            method,
            digest,
            references,
            id_attr,
            fips,
            output,
        }),

        Commands::C14n {
            file,
            with_comments,
            inclusive_prefixes,
            output,
        } => cmd_c14n(file, with_comments, &inclusive_prefixes, output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn cmd_verify(
    file: PathBuf,
    key: Option<PathBuf>,
    hmac_key: Option<PathBuf>,
    id_attr: Vec<String>,
    fips: bool,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let key = load_key(key, hmac_key)?.to_public();
    let ctx = build_context(&id_attr, fips);

    debug!("verifying {}", file.display());
    match verify_document(&xml, &key, &ctx) {
        Ok(signature) => {
            let count = signature.signed_info().references().len();
            println!("OK ({count} reference(s) verified)");
            Ok(())
        }
        Err(e @ (Error::SignatureVerificationFailed | Error::DigestVerificationFailed)) => {
            eprintln!("INVALID: {e}");
            process::exit(1);
        }
        Err(e) => Err(e),
    }
}

struct SignArgs {
    file: PathBuf,
    key: Option<PathBuf>,
    hmac_key: Option<PathBuf>,
    method: Option<String>,
    digest: String,
    references: Vec<String>,
    id_attr: Vec<String>,
    fips: bool,
    output: Option<PathBuf>,
}

fn cmd_sign(args: SignArgs) -> Result<(), Error> {
    let xml = read_file(&args.file)?;
    let key = load_key(args.key, args.hmac_key)?;
    if !key.has_private() {
        return Err(Error::Key("signing needs a private or symmetric key".into()));
    }
    let ctx = build_context(&args.id_attr, args.fips);

    let method = args.method.unwrap_or_else(|| {
        if key.is_symmetric() {
            algorithm::HMAC_SHA1.to_owned()
        } else {
            algorithm::RSA_SHA1.to_owned()
        }
    });
    let references = if args.references.is_empty() {
        vec![String::new()]
    } else {
        args.references
    };
    let mut signed_info = SignedInfo::new(method);
    for uri in &references {
        signed_info.add_reference(
            Reference::new(uri.as_str(), args.digest.as_str())
                .with_transform(Box::new(ExclusiveC14nTransform::new(C14nMode::Exclusive))),
        );
    }

    info!(
        "signing {} with {} reference(s)",
        args.file.display(),
        references.len()
    );
    let signed = sign_enveloped(&xml, Signature::new(signed_info), &key, &ctx)?;
    write_output(args.output, signed.as_bytes())
}

fn cmd_c14n(
    file: PathBuf,
    with_comments: bool,
    inclusive_prefixes: &str,
    output: Option<PathBuf>,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let mode = if with_comments {
        C14nMode::ExclusiveWithComments
    } else {
        C14nMode::Exclusive
    };
    let canonical = canonicalize(&xml, mode, &parse_prefix_list(inclusive_prefixes))?;
    write_output(output, &canonical)
}

// ── Utility functions ────────────────────────────────────────────────

fn read_file(path: &PathBuf) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(|e| Error::Other(format!("{}: {e}", p.display()))),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(data)
                .map_err(|e| Error::Other(format!("stdout: {e}")))
        }
    }
}

fn load_key(key_path: Option<PathBuf>, hmac_key_path: Option<PathBuf>) -> Result<SecurityKey, Error> {
    match (key_path, hmac_key_path) {
        (Some(_), Some(_)) => Err(Error::Key("pass either --key or --hmac-key, not both".into())),
        (Some(path), None) => SecurityKey::from_rsa_pem(&read_file(&path)?),
        (None, Some(path)) => std::fs::read(&path)
            .map(SecurityKey::symmetric)
            .map_err(|e| Error::Other(format!("{}: {e}", path.display()))),
        (None, None) => Err(Error::Key("no key given (use --key or --hmac-key)".into())),
    }
}

fn build_context(id_attrs: &[String], fips: bool) -> DsigContext {
    let mut ctx = DsigContext::new().with_fips_required(fips);
    for attr in id_attrs {
        ctx.add_id_attr(attr);
    }
    ctx
}
