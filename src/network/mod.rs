mod bootstrap;
mod radio;

pub use bootstrap::{Association, ConnectivityBootstrap};
pub use radio::{build_radio, NmcliRadio, Radio};
