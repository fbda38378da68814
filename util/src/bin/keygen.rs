//! Generates a buyer keypair (signing, for the backend control plane) and, on request, a fresh
//! relay/server backend keypair, printed as base64 the same way `Config` expects them (§6.4).
use clap::{App, Arg};
use netnext_crypto::{kx, sign};

fn print_signing_pair(label: &str, public_key: &[u8], secret_key: &[u8]) {
    println!("{}_PUBLIC_KEY={}", label, base64::encode(public_key));
    println!("{}_PRIVATE_KEY={}", label, base64::encode(secret_key));
}

fn print_kx_pair(label: &str, public_key: &[u8], secret_key: &[u8]) {
    println!("{}_PUBLIC_KEY={}", label, base64::encode(public_key));
    println!("{}_PRIVATE_KEY={}", label, base64::encode(secret_key));
}

fn main() {
    let matches = App::new("Key Generator")
        .version("1.0")
        .about("Generates buyer and backend keypairs for a network-next-style deployment.")
        .arg(
            Arg::with_name("KIND")
                .help("Which keypair to generate: buyer, relay-backend, or server-backend")
                .required(true)
                .possible_values(&["buyer", "relay-backend", "server-backend"]),
        )
        .get_matches();

    match matches.value_of("KIND").unwrap() {
        "buyer" => {
            let (public_key, secret_key) = sign::generate_keypair();
            print_signing_pair("BUYER", &public_key, &secret_key);
        }
        "relay-backend" => {
            let (public_key, secret_key) = kx::generate_keypair();
            print_kx_pair("RELAY_BACKEND", &public_key, &secret_key);
        }
        "server-backend" => {
            let (public_key, secret_key) = kx::generate_keypair();
            print_kx_pair("SERVER_BACKEND", &public_key, &secret_key);
        }
        _ => unreachable!(),
    }
}
