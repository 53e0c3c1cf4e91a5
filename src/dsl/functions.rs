// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - DSL Helper Functions
 * Fixed table of helpers available inside template expressions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::value::Value;

fn arg<'a>(args: &'a [Value], idx: usize, name: &str) -> Result<&'a Value, String> {
    args.get(idx)
        .ok_or_else(|| format!("{}: missing argument {}", name, idx + 1))
}

fn str_arg(args: &[Value], idx: usize, name: &str) -> Result<String, String> {
    Ok(arg(args, idx, name)?.to_string())
}

fn int_arg(args: &[Value], idx: usize, name: &str) -> Result<i64, String> {
    arg(args, idx, name)?
        .as_int()
        .ok_or_else(|| format!("{}: argument {} is not numeric", name, idx + 1))
}

/// Invoke a helper by name. Adding a helper is a new match arm, not a new
/// code path: every helper takes evaluated values and returns one value.
pub fn call(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "md5" => {
            let digest = md5::compute(arg(args, 0, name)?.to_bytes());
            Ok(Value::String(format!("{:x}", digest)))
        }
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(arg(args, 0, name)?.to_bytes());
            Ok(Value::String(hex::encode(hasher.finalize())))
        }
        "base64" => Ok(Value::String(BASE64.encode(arg(args, 0, name)?.to_bytes()))),
        "base64_decode" => {
            let decoded = BASE64
                .decode(str_arg(args, 0, name)?)
                .map_err(|e| format!("base64_decode: {}", e))?;
            Ok(Value::Bytes(decoded))
        }
        "hex_encode" => Ok(Value::String(hex::encode(arg(args, 0, name)?.to_bytes()))),
        "hex_decode" => {
            let decoded =
                hex::decode(str_arg(args, 0, name)?).map_err(|e| format!("hex_decode: {}", e))?;
            Ok(Value::Bytes(decoded))
        }
        "url_encode" => {
            let input = str_arg(args, 0, name)?;
            let encoded: String = url::form_urlencoded::byte_serialize(input.as_bytes()).collect();
            Ok(Value::String(encoded))
        }
        "url_decode" => {
            let input = str_arg(args, 0, name)?;
            let decoded: String = url::form_urlencoded::parse(input.as_bytes())
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.into_owned()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("&");
            Ok(Value::String(decoded))
        }
        "to_upper" => Ok(Value::String(str_arg(args, 0, name)?.to_uppercase())),
        "to_lower" => Ok(Value::String(str_arg(args, 0, name)?.to_lowercase())),
        "trim" => {
            let input = str_arg(args, 0, name)?;
            let cutset = str_arg(args, 1, name)?;
            Ok(Value::String(
                input.trim_matches(|c| cutset.contains(c)).to_string(),
            ))
        }
        "trim_space" => Ok(Value::String(str_arg(args, 0, name)?.trim().to_string())),
        "replace" => {
            let input = str_arg(args, 0, name)?;
            let old = str_arg(args, 1, name)?;
            let new = str_arg(args, 2, name)?;
            Ok(Value::String(input.replace(&old, &new)))
        }
        "contains" => {
            let haystack = str_arg(args, 0, name)?;
            let needle = str_arg(args, 1, name)?;
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        "starts_with" => {
            let haystack = str_arg(args, 0, name)?;
            let prefix = str_arg(args, 1, name)?;
            Ok(Value::Bool(haystack.starts_with(&prefix)))
        }
        "ends_with" => {
            let haystack = str_arg(args, 0, name)?;
            let suffix = str_arg(args, 1, name)?;
            Ok(Value::Bool(haystack.ends_with(&suffix)))
        }
        "len" => {
            let len = match arg(args, 0, name)? {
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                Value::Bytes(b) => b.len(),
                other => other.to_string().len(),
            };
            Ok(Value::Int(len as i64))
        }
        "regex" => {
            let pattern = str_arg(args, 0, name)?;
            let corpus = str_arg(args, 1, name)?;
            let re = Regex::new(&pattern).map_err(|e| format!("regex: {}", e))?;
            Ok(Value::Bool(re.is_match(&corpus)))
        }
        "rand_int" => {
            let mut rng = rand::thread_rng();
            let (min, max) = match args.len() {
                0 => (0i64, i64::from(u32::MAX)),
                1 => (0i64, int_arg(args, 0, name)?),
                _ => (int_arg(args, 0, name)?, int_arg(args, 1, name)?),
            };
            if min >= max {
                return Err("rand_int: min must be below max".into());
            }
            Ok(Value::Int(rng.gen_range(min..=max)))
        }
        "rand_text_alpha" => {
            let n = int_arg(args, 0, name)?.max(0) as usize;
            let mut rng = rand::thread_rng();
            let out: String = (0..n)
                .map(|_| (b'a' + rng.gen_range(0..26)) as char)
                .collect();
            Ok(Value::String(out))
        }
        "to_string" => Ok(Value::String(arg(args, 0, name)?.to_string())),
        "to_number" => arg(args, 0, name)?
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| "to_number: not numeric".to_string()),
        other => Err(format!("unknown helper function '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_helpers() {
        let out = call("md5", &[Value::from("admin")]).unwrap();
        assert_eq!(out.to_string(), "21232f297a57a5a743894a0e4a801fc3");

        let out = call("sha256", &[Value::from("x")]).unwrap();
        assert_eq!(out.to_string().len(), 64);
    }

    #[test]
    fn test_encoding_helpers() {
        assert_eq!(
            call("base64", &[Value::from("hello")]).unwrap().to_string(),
            "aGVsbG8="
        );
        assert_eq!(
            call("base64_decode", &[Value::from("aGVsbG8=")])
                .unwrap()
                .to_string(),
            "hello"
        );
        assert_eq!(
            call("hex_encode", &[Value::from("ab")]).unwrap().to_string(),
            "6162"
        );
        assert_eq!(
            call("url_encode", &[Value::from("a b&c")])
                .unwrap()
                .to_string(),
            "a+b%26c"
        );
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(
            call("to_upper", &[Value::from("abc")]).unwrap(),
            Value::String("ABC".into())
        );
        assert_eq!(
            call("contains", &[Value::from("admin panel"), Value::from("panel")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(call("len", &[Value::from("abcd")]).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_rand_int_bounds() {
        for _ in 0..50 {
            let v = call("rand_int", &[Value::Int(10), Value::Int(20)])
                .unwrap()
                .as_int()
                .unwrap();
            assert!((10..=20).contains(&v));
        }
        assert!(call("rand_int", &[Value::Int(5), Value::Int(5)]).is_err());
    }

    #[test]
    fn test_unknown_function() {
        assert!(call("nope", &[]).is_err());
    }
}
