use crate::config::UserSettings;
use crate::error::{ImsError, Result};

/// IMS identities used for registration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
    pub home_domain: String,
    /// IMPI
    pub private_id: String,
    /// IMPU
    pub public_uri: String,
    pub password: String,
    pub realm: String,
}

impl UserProfile {
    /// Profile provisioned for HTTP Digest
    pub fn from_settings(user: &UserSettings) -> Self {
        let private_id = if user.private_id.is_empty() {
            format!("{}@{}", user.username, user.home_domain)
        } else {
            user.private_id.clone()
        };
        let realm = if user.realm.is_empty() {
            user.home_domain.clone()
        } else {
            user.realm.clone()
        };

        Self {
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            home_domain: user.home_domain.clone(),
            private_id,
            public_uri: format!("sip:{}@{}", user.username, user.home_domain),
            password: user.password.clone(),
            realm,
        }
    }

    /// Identities derived from the IMSI for GIBA (3GPP TS 23.003 §13):
    /// `ims.mnc<MNC>.mcc<MCC>.3gppnetwork.org` with the MNC padded to
    /// three digits
    pub fn from_imsi(imsi: &str, mnc_length: u8) -> Result<Self> {
        let mnc_length = mnc_length as usize;
        if !(2..=3).contains(&mnc_length)
            || imsi.len() < 3 + mnc_length
            || imsi.len() > 15
            || !imsi.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ImsError::Configuration(format!("invalid IMSI {:?}", imsi)));
        }

        let mcc = &imsi[..3];
        let mnc = &imsi[3..3 + mnc_length];
        let home_domain = format!("ims.mnc{:0>3}.mcc{}.3gppnetwork.org", mnc, mcc);

        Ok(Self {
            username: imsi.to_string(),
            display_name: String::new(),
            private_id: format!("{}@{}", imsi, home_domain),
            public_uri: format!("sip:{}@{}", imsi, home_domain),
            password: String::new(),
            realm: home_domain.clone(),
            home_domain,
        })
    }
}
