/// Authentication deep-link parsing
///
/// `scheme://auth/{provider}?code=&state=&error=`
/// `scheme://reset-password?token=`
/// `scheme://verify-email?token=`
/// `scheme://verify-device?token=&deviceId=`
///
/// The host segment selects the flow. Malformed or unrecognized URLs yield
/// `None` rather than an error; callers decide whether that is notable.
use std::collections::HashMap;

use url::Url;

use crate::models::DeepLinkFlow;

pub fn parse(raw: &str) -> Option<DeepLinkFlow> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;

    let query: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match host {
        "auth" => {
            let provider = url
                .path_segments()?
                .find(|segment| !segment.is_empty())?
                .to_string();

            Some(DeepLinkFlow::OauthCallback {
                provider,
                code: query.get("code").cloned(),
                state: query.get("state").cloned(),
                error: query.get("error").cloned(),
            })
        }
        "reset-password" => Some(DeepLinkFlow::PasswordReset {
            token: query.get("token").cloned()?,
        }),
        "verify-email" => Some(DeepLinkFlow::EmailVerification {
            token: query.get("token").cloned()?,
        }),
        "verify-device" => Some(DeepLinkFlow::DeviceVerification {
            token: query.get("token").cloned()?,
            device_id: query.get("deviceId").cloned(),
        }),
        _ => None,
    }
}
