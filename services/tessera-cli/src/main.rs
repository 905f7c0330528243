// Command-line front end for issuing and inspecting tokens.
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::process::ExitCode;
use std::time::Duration;
use tessera_token::{
    Algorithm, ClaimSet, EncodeOptions, IssuedToken, PermissionGrant, PermissionGrants,
    RefreshOptions, Reissued, SubjectSerializer, TokenConfig, TokenEngine, TokenError,
    VerifyOptions,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(about = "Issue, verify and inspect signed tokens")]
#[command(after_help = "Reads TESSERA_* variables and the TESSERA_CONFIG overlay.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a token for a subject
    Issue {
        /// Subject the token is issued for, e.g. User:42
        #[arg(long)]
        sub: String,

        /// Token type, stored as the audience
        #[arg(long = "type", default_value = "access")]
        token_type: String,

        /// Lifetime override, e.g. 15m or 30days
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<Duration>,

        /// Permission grant `set=a,b` or `set=max`; repeatable
        #[arg(long = "perm", value_parser = parse_grant)]
        perms: Vec<(String, PermissionGrant)>,

        /// Extra claim `key=value`; JSON values are parsed, anything else is a string
        #[arg(long = "claim", value_parser = parse_claim)]
        claims: Vec<(String, Value)>,

        /// Signing algorithm; must be in the allow-list
        #[arg(long)]
        alg: Option<Algorithm>,
    },
    /// Verify a token and print its claims
    Verify {
        token: String,

        /// Required token type
        #[arg(long = "type")]
        token_type: Option<String>,
    },
    /// Decode a token without verifying it
    Peek { token: String },
    /// Replace a token with a fresh one for the same identity
    Refresh {
        token: String,

        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<Duration>,
    },
    /// Trade a token of one type for another
    Exchange {
        token: String,

        /// Accepted source token type; repeatable
        #[arg(long = "from", required = true)]
        from: Vec<String>,

        /// Token type to mint
        #[arg(long = "to")]
        to: String,

        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<Duration>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args.command) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = err
                .downcast_ref::<TokenError>()
                .map(TokenError::code)
                .unwrap_or("error");
            let body = json!({ "error": code, "message": format!("{err:#}") });
            eprintln!("{body:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<Value> {
    let config = TokenConfig::from_env_or_yaml().context("load token config")?;
    debug!(issuer = %config.issuer, algorithms = ?config.algorithms, "config loaded");
    let engine = TokenEngine::new(config, SubjectSerializer)?;

    let output = match command {
        Command::Issue {
            sub,
            token_type,
            ttl,
            perms,
            claims,
            alg,
        } => {
            let grants: PermissionGrants = perms.into_iter().collect();
            let options = EncodeOptions {
                ttl,
                permissions: (!grants.is_empty()).then_some(grants),
                algorithm: alg,
            };
            let extra: ClaimSet = claims.into_iter().collect();
            let issued = engine.encode_and_sign(&sub, &token_type, &extra, &options)?;
            issued_json(&issued)
        }
        Command::Verify { token, token_type } => {
            let claims = engine.decode_and_verify(&token, &VerifyOptions { token_type })?;
            let permissions = engine.decode_permissions(&claims)?;
            json!({ "claims": claims, "permissions": permissions })
        }
        Command::Peek { token } => {
            let peeked = engine.peek(&token)?;
            json!({
                "header": serde_json::to_value(&peeked.header)?,
                "claims": peeked.claims,
                "verified": false,
            })
        }
        Command::Refresh { token, ttl } => {
            let reissued = engine.refresh(&token, &ClaimSet::new(), &RefreshOptions { ttl })?;
            reissued_json(&reissued)
        }
        Command::Exchange {
            token,
            from,
            to,
            ttl,
        } => {
            let from: Vec<&str> = from.iter().map(String::as_str).collect();
            let options = EncodeOptions {
                ttl,
                ..EncodeOptions::default()
            };
            let reissued = engine.exchange(&token, &from, &to, &options)?;
            reissued_json(&reissued)
        }
    };
    Ok(output)
}

fn issued_json(issued: &IssuedToken) -> Value {
    json!({ "token": issued.token, "claims": issued.claims })
}

fn reissued_json(reissued: &Reissued) -> Value {
    json!({
        "token": reissued.new.token,
        "claims": reissued.new.claims,
        "replaced_jti": reissued.old.jti(),
    })
}

fn parse_ttl(value: &str) -> Result<Duration, String> {
    tessera_token::parse_duration(value).map_err(|err| format!("{err:#}"))
}

fn parse_grant(value: &str) -> Result<(String, PermissionGrant)> {
    let (set, symbols) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected set=a,b or set=max, got {value:?}"))?;
    if set.is_empty() {
        return Err(anyhow!("permission set name is empty"));
    }
    let grant = match symbols {
        "max" => PermissionGrant::max(),
        "" => PermissionGrant::named(Vec::<String>::new()),
        symbols => PermissionGrant::named(symbols.split(',').map(str::trim)),
    };
    Ok((set.to_string(), grant))
}

fn parse_claim(value: &str) -> Result<(String, Value)> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {value:?}"))?;
    if key.is_empty() {
        return Err(anyhow!("claim name is empty"));
    }
    let parsed = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_parse_named_and_max() {
        let (set, grant) = parse_grant("default=read, write").expect("named");
        assert_eq!(set, "default");
        assert_eq!(grant, PermissionGrant::named(["read", "write"]));
        let (_, grant) = parse_grant("admin=max").expect("max");
        assert_eq!(grant, PermissionGrant::max());
        assert!(parse_grant("default").is_err());
        assert!(parse_grant("=read").is_err());
    }

    #[test]
    fn claims_prefer_json_values() {
        assert_eq!(
            parse_claim("n=3").expect("number"),
            ("n".to_string(), json!(3))
        );
        assert_eq!(
            parse_claim("flag=true").expect("bool"),
            ("flag".to_string(), json!(true))
        );
        assert_eq!(
            parse_claim("tenant=acme").expect("string"),
            ("tenant".to_string(), json!("acme"))
        );
        assert_eq!(
            parse_claim("url=a=b").expect("split once"),
            ("url".to_string(), json!("a=b"))
        );
        assert!(parse_claim("novalue").is_err());
    }

    #[test]
    fn args_parse_subcommands() {
        let args = Args::try_parse_from([
            "tessera", "issue", "--sub", "User:42", "--perm", "default=read", "--ttl", "30days",
        ])
        .expect("issue args");
        let Command::Issue {
            sub,
            token_type,
            ttl,
            perms,
            ..
        } = args.command
        else {
            panic!("expected issue");
        };
        assert_eq!(sub, "User:42");
        assert_eq!(token_type, "access");
        assert_eq!(ttl, Some(Duration::from_secs(30 * 24 * 60 * 60)));
        assert_eq!(perms.len(), 1);

        let missing_from = ["tessera", "exchange", "tok", "--to", "access"];
        assert!(Args::try_parse_from(missing_from).is_err());
    }
}
